//! Task status and cancellation.

use axum::extract::{Path, State};
use axum::Json;
use folio_queue::{StatusReport, TaskId};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

fn parse_task_id(raw: &str) -> AppResult<TaskId> {
    TaskId::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid task id '{raw}'")))
}

/// GET /api/v1/tasks/{task_id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<DataResponse<StatusReport>>> {
    let task_id = parse_task_id(&task_id)?;
    let report = state.service.status(task_id).await;
    Ok(Json(DataResponse { data: report }))
}

#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub task_id: TaskId,
    /// `false` when the task had already finished.
    pub revoked: bool,
}

/// POST /api/v1/tasks/{task_id}/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<DataResponse<CancelResult>>> {
    let task_id = parse_task_id(&task_id)?;
    let revoked = state.service.cancel(task_id).await;
    tracing::info!(task_id = %task_id, revoked, "Cancellation requested");
    Ok(Json(DataResponse {
        data: CancelResult { task_id, revoked },
    }))
}
