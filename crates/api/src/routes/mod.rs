pub mod books;
pub mod health;
pub mod recognitions;
pub mod tasks;
pub mod uploads;

use axum::Router;

use crate::config::ServerConfig;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /uploads                           store source images (multipart)
/// /books                             submit a book request
/// /books/{artifact_id}/download      stream a merged book, then reclaim it
/// /recognitions                      submit plain-text OCR jobs
/// /tasks/{task_id}                   poll status
/// /tasks/{task_id}/cancel            revoke
/// ```
pub fn api_routes(config: &ServerConfig) -> Router<AppState> {
    Router::new()
        .nest("/uploads", uploads::router(config.max_upload_bytes))
        .nest("/books", books::router())
        .nest("/recognitions", recognitions::router())
        .nest("/tasks", tasks::router())
}
