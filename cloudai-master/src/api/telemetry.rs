//! `/telemetry` and `/ws/telemetry` (spec §6): point-in-time usage
//! snapshots plus a live push feed tapping the same broadcast channel C2
//! publishes to. The WebSocket handlers follow the teacher's
//! `api::connect::ws` shape: a raw `poem` handler that upgrades and spawns
//! a forwarding task, rather than a typed `poem-openapi` endpoint.

use crate::bootstrap::Services;
use cloudai_common::model::WorkerId;
use futures::{SinkExt, StreamExt};
use poem::web::websocket::{Message, WebSocket};
use poem::web::{Data, Path};
use poem::{handler, IntoResponse, Response};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

#[handler]
pub async fn snapshot_all(Data(services): Data<&Services>) -> Response {
    let workers = services.registry.snapshot().await;
    let snapshots: Vec<_> = workers
        .into_iter()
        .map(|w| json!({ "worker_id": w.worker_id, "usage": w.latest_usage }))
        .collect();
    poem::web::Json(json!({ "telemetry": snapshots })).into_response()
}

#[handler]
pub async fn snapshot_one(Data(services): Data<&Services>, Path(id): Path<String>) -> Response {
    match services.registry.get(&WorkerId(id.clone())).await {
        Some(worker) => poem::web::Json(json!({
            "worker_id": worker.worker_id,
            "usage": worker.latest_usage,
        }))
        .into_response(),
        None => crate::api::not_found("worker"),
    }
}

#[handler]
pub async fn ws_all(websocket: WebSocket, Data(services): Data<&Services>) -> impl IntoResponse {
    let mut updates = services.telemetry.subscribe();
    websocket.on_upgrade(move |socket| async move {
        let (mut sink, _stream) = socket.split();
        loop {
            match updates.recv().await {
                Ok(snapshot) => {
                    let payload = json!({
                        "worker_id": snapshot.worker_id,
                        "usage": snapshot.usage,
                    });
                    if sink.send(Message::Text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[handler]
pub async fn ws_one(
    Path(worker_id): Path<String>,
    websocket: WebSocket,
    Data(services): Data<&Services>,
) -> impl IntoResponse {
    let mut updates = services.telemetry.subscribe();
    websocket.on_upgrade(move |socket| async move {
        let (mut sink, _stream) = socket.split();
        loop {
            match updates.recv().await {
                Ok(snapshot) if snapshot.worker_id.0 == worker_id => {
                    let payload = json!({
                        "worker_id": snapshot.worker_id,
                        "usage": snapshot.usage,
                    });
                    if sink.send(Message::Text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}
