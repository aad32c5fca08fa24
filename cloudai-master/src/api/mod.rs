//! REST surface (spec §6 "REST surface (operator / UI)").
//!
//! `/health` is typed, self-documenting `poem-openapi` the way the teacher's
//! `HealthcheckApi` is. The rest of the surface is plain `poem` handlers: a
//! couple of request fields (`cpu_required`/`memory_required`) accept either
//! a JSON number or a numeric string, which doesn't fit a typed
//! `poem-openapi::Object` field, and the telemetry routes need a raw
//! WebSocket upgrade the way the teacher's `connect::ws` handler does.

pub mod healthcheck;
pub mod tasks;
pub mod telemetry;
pub mod workers;

use crate::bootstrap::Services;
use cloudai_common::error::CloudAiError;
use poem::http::StatusCode;
use poem::web::Json;
use poem::{EndpointExt, IntoResponse, Response, Route};
use poem_openapi::{OpenApiService, Tags};
use serde_json::json;

#[derive(Tags)]
pub enum ApiTags {
    HealthCheck,
}

pub fn make_open_api_service(services: &Services) -> OpenApiService<healthcheck::HealthcheckApi, ()> {
    OpenApiService::new(
        healthcheck::HealthcheckApi::new(services.registry.clone()),
        "CloudAI Master API",
        crate::VERSION,
    )
}

/// Everything under `/api`, `/telemetry` and `/ws/telemetry`: plain `poem`
/// handlers sharing `services` as route data.
pub fn domain_routes(services: &Services) -> Route {
    Route::new()
        .nest("/api/tasks", tasks::routes())
        .nest("/api/workers", workers::routes())
        .at("/telemetry", poem::get(telemetry::snapshot_all))
        .at("/telemetry/:worker_id", poem::get(telemetry::snapshot_one))
        .at("/ws/telemetry", poem::get(telemetry::ws_all))
        .at("/ws/telemetry/:worker_id", poem::get(telemetry::ws_one))
        .data(services.clone())
}

pub(crate) fn error_response(err: CloudAiError) -> Response {
    let status = match &err {
        CloudAiError::Unauthorized => StatusCode::UNAUTHORIZED,
        CloudAiError::InvalidSubmission(_) => StatusCode::BAD_REQUEST,
        CloudAiError::NotFound(_) => StatusCode::NOT_FOUND,
        CloudAiError::AlreadyRegistered | CloudAiError::HasRunningTasks => StatusCode::CONFLICT,
        CloudAiError::InsufficientResources => StatusCode::CONFLICT,
        CloudAiError::WorkerUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CloudAiError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

pub(crate) fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

pub(crate) fn not_found(resource: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{resource} not found") })),
    )
        .into_response()
}
