//! Periodic expiry of completed task results.
//!
//! Runs on a fixed interval using `tokio::time::interval` and removes
//! records whose `RESULT_EXPIRES_SECS` window has passed.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::ResultBackend;

/// Run the result retention loop until `cancel` is triggered.
pub async fn run(backend: Arc<dyn ResultBackend>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Result retention job started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Result retention job stopping");
                break;
            }
            _ = ticker.tick() => {
                let removed = backend.remove_expired().await;
                if removed > 0 {
                    tracing::info!(removed, "Result retention: purged expired results");
                } else {
                    tracing::debug!("Result retention: nothing to purge");
                }
            }
        }
    }
}
