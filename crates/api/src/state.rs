use std::sync::Arc;

use folio_pipeline::BookService;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Submission, status, cancellation and artifact retrieval.
    pub service: BookService,
    pub config: Arc<ServerConfig>,
}
