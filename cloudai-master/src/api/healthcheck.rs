//! `GET /health` — cheap liveness signal for operators (spec §6, SPEC_FULL
//! §11): not the task/worker surface, just process-is-up plus a worker
//! count an operator can eyeball without a dashboard.

use crate::api::ApiTags;
use crate::registry::WorkerRegistry;
use poem_openapi::payload::Json;
use poem_openapi::{Object, OpenApi};
use std::sync::Arc;

#[derive(Debug, Object)]
pub struct HealthResponse {
    pub status: String,
    pub active_workers: usize,
}

pub struct HealthcheckApi {
    registry: Arc<WorkerRegistry>,
}

impl HealthcheckApi {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        HealthcheckApi { registry }
    }
}

#[OpenApi(prefix_path = "/", tag = "ApiTags::HealthCheck")]
impl HealthcheckApi {
    #[oai(path = "/health", method = "get", operation_id = "health")]
    async fn health(&self) -> Json<HealthResponse> {
        let active_workers = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|w| w.active)
            .count();
        Json(HealthResponse {
            status: "ok".to_string(),
            active_workers,
        })
    }
}
