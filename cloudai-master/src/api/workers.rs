//! `/api/workers` (spec §6): read-only worker fleet views.

use crate::api::not_found;
use crate::bootstrap::Services;
use cloudai_common::model::WorkerId;
use poem::web::{Data, Json, Path};
use poem::{get, handler, IntoResponse, Response, Route};
use serde_json::json;

#[handler]
async fn list_workers(Data(services): Data<&Services>) -> Response {
    let workers = services.registry.snapshot().await;
    Json(json!({ "workers": workers })).into_response()
}

#[handler]
async fn get_worker(Data(services): Data<&Services>, Path(id): Path<String>) -> Response {
    match services.registry.get(&WorkerId(id)).await {
        Some(worker) => Json(worker).into_response(),
        None => not_found("worker"),
    }
}

pub fn routes() -> Route {
    Route::new()
        .at("/", get(list_workers))
        .at("/:id", get(get_worker))
}
