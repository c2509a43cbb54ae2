//! Task endpoints: POST /tasks and GET /tasks/{id}/status.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use hourglass_core::TaskId;
use hourglass_scheduler::{SchedulerError, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::app::AppState;

type ApiError = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub command: String,
    /// RFC 3339 timestamp.
    pub scheduled_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
    pub command: String,
    /// Unix seconds.
    pub scheduled_at: i64,
}

/// POST /tasks
///
/// Returns 201 with the new task id, 400 on bad input, 500 if the store
/// cannot be reached.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    let Json(req) = body.map_err(|e| {
        warn!(error = %e, "malformed task request");
        bad_request("malformed request body")
    })?;

    let raw = req
        .scheduled_at
        .as_deref()
        .ok_or_else(|| bad_request("scheduled_at is required"))?;
    let scheduled_at = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| bad_request("invalid scheduled_at; use RFC 3339, e.g. 2026-01-01T10:00:00Z"))?;

    let task = state
        .store
        .create(&req.command, scheduled_at)
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            task_id: task.id,
            command: task.command,
            scheduled_at: task.scheduled_at.timestamp(),
        }),
    ))
}

/// GET /tasks/{id}/status
pub async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatus>, ApiError> {
    state
        .status
        .status(&TaskId::from(id))
        .map(Json)
        .map_err(api_error)
}

fn bad_request(msg: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })))
}

/// Map a scheduler error to an HTTP response. Internal details are logged,
/// not returned.
fn api_error(e: SchedulerError) -> ApiError {
    match e {
        SchedulerError::Validation(msg) => bad_request(&msg),
        SchedulerError::TaskNotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "task not found" })),
        ),
        other => {
            error!(error = %other, "task request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "unable to process the request, try again later" })),
            )
        }
    }
}
