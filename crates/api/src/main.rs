use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use folio_core::ocr::TesseractCli;
use folio_core::storage::{ObjectStore, StorageConfig};
use folio_pipeline::{task_registry, BookService, PipelineConfig, PipelineDeps};
use folio_queue::{retention, EngineConfig, TaskEngine, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_api::config::ServerConfig;
use folio_api::router::build_app_router;
use folio_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "folio_api=debug,folio_queue=info,folio_pipeline=info,tower_http=debug".into()
        }))
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let server_config = ServerConfig::from_env().context("Invalid server configuration")?;
    let engine_config = EngineConfig::from_env().context("Invalid worker configuration")?;
    let pipeline_config = PipelineConfig::from_env().context("Invalid OCR configuration")?;
    let storage_config = StorageConfig::from_env();
    tracing::info!(
        host = %server_config.host,
        port = server_config.port,
        concurrency = engine_config.concurrency,
        storage_root = %storage_config.root.display(),
        "Loaded configuration",
    );

    // --- Object store ---
    let store = Arc::new(
        ObjectStore::open(&storage_config)
            .await
            .context("Failed to prepare storage directories")?,
    );

    // --- External engines ---
    match TesseractCli::from_env().version().await {
        Ok(version) => tracing::info!(%version, "OCR engine available"),
        Err(e) => tracing::warn!(error = %e, "OCR engine not available; page jobs will retry and fail"),
    }
    let deps = PipelineDeps::with_system_tools(store.clone(), pipeline_config.clone());

    // --- Task engine and workers ---
    let sweep_interval = engine_config.result_sweep_interval;
    let engine = TaskEngine::in_memory(engine_config, task_registry(&deps));
    let cancel = CancellationToken::new();

    let pool_handle = tokio::spawn(WorkerPool::new(engine.clone()).run(cancel.clone()));
    let retention_handle = tokio::spawn(retention::run(
        engine.backend(),
        sweep_interval,
        cancel.clone(),
    ));
    tracing::info!("Worker pool and result retention started");

    // --- App ---
    let state = AppState {
        service: BookService::new(engine, store, pipeline_config),
        config: Arc::new(server_config.clone()),
    };
    let app = build_app_router(state).context("Failed to build router")?;

    // --- Start server ---
    let host = server_config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", server_config.host))?;
    let addr = SocketAddr::new(host, server_config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, draining workers");
    cancel.cancel();
    let drain = Duration::from_secs(server_config.shutdown_timeout_secs);
    if tokio::time::timeout(drain, pool_handle).await.is_err() {
        tracing::warn!("Worker pool did not stop within the shutdown timeout");
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
