use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// GET  /{task_id}           -> get_status
/// POST /{task_id}/cancel    -> cancel_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{task_id}", get(tasks::get_status))
        .route("/{task_id}/cancel", post(tasks::cancel_task))
}
