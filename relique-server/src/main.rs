mod config;
mod error;
mod routes;
mod state;

use crate::config::AppConfig;
use crate::state::AppState;
use relique::{Configuration, CoreConfig, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load();
    relique::utils::logger::init(&config.log_level)?;

    tracing::info!(config = %config.config_file.display(), "Starting relique server");

    let core = CoreConfig::from_file(&config.config_file)?;
    let configuration = Configuration::load(core)?;
    let orchestrator = Orchestrator::open(configuration)?;

    // Jobs left running by a previous process can no longer finish
    let interrupted = orchestrator.recover().await?;
    if !interrupted.is_empty() {
        tracing::warn!(count = interrupted.len(), "Marked interrupted jobs as failed");
    }

    let state = Arc::new(AppState::new(orchestrator));
    let app = routes::create_router(state.clone());

    let addr = config.listen_address();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    // Running jobs are cancelled as soon as a signal arrives, not after the
    // open connections drained
    let cancel = CancellationToken::new();
    let tracker = state.tracker.clone();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        watcher.cancelled().await;
        let cancelled = tracker.cancel_all().await;
        if cancelled > 0 {
            tracing::warn!(cancelled, "Cancelled running jobs");
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Cancelled jobs still record their final status
    let drain = async {
        while !state.tracker.running().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!("Jobs still running at exit");
    }

    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
