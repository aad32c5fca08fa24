//! `/api/tasks` (spec §6): submission, listing, detail, cancellation, logs.
//!
//! Plain `poem` handlers rather than `poem-openapi` typed endpoints: a
//! submission's `cpu_required`/`memory_required` may arrive as a JSON number
//! or a numeric string (spec §6), which a typed `Object` field can't accept
//! without a custom deserializer, so the body is read as `serde_json::Value`
//! and coerced by hand, the same latitude the teacher reaches for raw
//! handlers (`api::connect::ws`) when the typed surface doesn't fit.

use crate::admission::TaskSpec;
use crate::api::{bad_request, error_response, not_found};
use crate::bootstrap::Services;
use cloudai_common::model::{TaskId, TaskStatus};
use poem::web::{Data, Json, Path, Query};
use poem::{get, handler, IntoResponse, Response, Route};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct RawTaskSubmission {
    docker_image: String,
    command: Option<String>,
    cpu_required: serde_json::Value,
    memory_required: serde_json::Value,
    storage_required: Option<serde_json::Value>,
    gpu_required: Option<serde_json::Value>,
    user_id: Option<String>,
    tag: Option<String>,
    k_value: Option<f64>,
    task_class: Option<String>,
}

/// Accepts a JSON number or a numeric string, spec §6.
fn coerce_numeric(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_task_id(raw: &str) -> Option<TaskId> {
    Uuid::from_str(raw).ok().map(TaskId)
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw {
        "queued" => Some(TaskStatus::Queued),
        "running" => Some(TaskStatus::Running),
        "completed" => Some(TaskStatus::Completed),
        "failed" => Some(TaskStatus::Failed),
        "cancelled" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

#[handler]
async fn submit_task(Data(services): Data<&Services>, body: Json<serde_json::Value>) -> Response {
    let raw: RawTaskSubmission = match serde_json::from_value(body.0) {
        Ok(raw) => raw,
        Err(err) => return bad_request(format!("invalid request body: {err}")),
    };
    let Some(cpu_required) = coerce_numeric(&raw.cpu_required) else {
        return bad_request("cpu_required must be a number or a numeric string");
    };
    let Some(memory_required) = coerce_numeric(&raw.memory_required) else {
        return bad_request("memory_required must be a number or a numeric string");
    };
    let storage_required = raw.storage_required.as_ref().and_then(coerce_numeric);
    let gpu_required = raw.gpu_required.as_ref().and_then(coerce_numeric);

    let spec = TaskSpec {
        image: raw.docker_image,
        command: raw.command,
        cpu_required,
        memory_required,
        storage_required,
        gpu_required,
        user_id: raw.user_id.unwrap_or_else(|| "anonymous".to_string()),
        tag: raw.tag,
        k_value: raw.k_value,
        task_class: raw.task_class,
    };

    match services.admission.submit(spec).await {
        Ok(task_id) => (
            poem::http::StatusCode::CREATED,
            Json(json!({
                "task_id": task_id.to_string(),
                "status": "queued",
                "message": "task accepted",
            })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

#[handler]
async fn list_tasks(Data(services): Data<&Services>, Query(params): Query<ListQuery>) -> Response {
    let status_filter = match &params.status {
        Some(raw) => match parse_status(raw) {
            Some(status) => Some(status),
            None => return bad_request(format!("unknown status '{raw}'")),
        },
        None => None,
    };
    let tasks = services.assignment.list_tasks(status_filter).await;
    Json(json!({ "tasks": tasks })).into_response()
}

#[handler]
async fn get_task(Data(services): Data<&Services>, Path(id): Path<String>) -> Response {
    let Some(task_id) = parse_task_id(&id) else {
        return not_found("task");
    };
    let Some(task) = services.assignment.get_task(task_id).await else {
        return not_found("task");
    };
    let assignment = services.assignment.get_assignment(task_id).await;
    let result = services.store.get_result(task_id).await;
    Json(json!({ "task": task, "assignment": assignment, "result": result })).into_response()
}

#[handler]
async fn cancel_task(Data(services): Data<&Services>, Path(id): Path<String>) -> Response {
    let Some(task_id) = parse_task_id(&id) else {
        return not_found("task");
    };
    match services.assignment.cancel(task_id).await {
        Ok(()) => Json(json!({ "task_id": id, "status": "cancelled" })).into_response(),
        Err(err) => error_response(err),
    }
}

#[handler]
async fn task_logs(Data(services): Data<&Services>, Path(id): Path<String>) -> Response {
    let Some(task_id) = parse_task_id(&id) else {
        return not_found("task");
    };
    if services.assignment.get_task(task_id).await.is_none() {
        return not_found("task");
    }
    let logs = services
        .store
        .get_result(task_id)
        .await
        .map(|r| r.logs)
        .unwrap_or_default();
    Json(json!({ "task_id": id, "logs": logs })).into_response()
}

pub fn routes() -> Route {
    Route::new()
        .at("/", get(list_tasks).post(submit_task))
        .at("/:id", get(get_task).delete(cancel_task))
        .at("/:id/logs", get(task_logs))
}
