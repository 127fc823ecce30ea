use axum::routing::{get, post};
use axum::Router;

use crate::handlers::books;
use crate::state::AppState;

/// Routes mounted at `/books`.
///
/// ```text
/// POST /                          -> submit_book
/// GET  /{artifact_id}/download    -> download_book
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(books::submit_book))
        .route("/{artifact_id}/download", get(books::download_book))
}
