use axum::routing::post;
use axum::Router;

use crate::handlers::recognitions;
use crate::state::AppState;

/// Routes mounted at `/recognitions`.
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(recognitions::submit_recognitions))
}
