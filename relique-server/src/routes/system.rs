use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use relique::orchestrator::InstalledModule;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/config/version", get(config_version))
        .route("/api/modules", get(list_modules))
        .route("/api/retention/clean", post(retention_clean))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn config_version(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "version": state.orchestrator.config().version() }))
}

async fn list_modules(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InstalledModule>>, AppError> {
    let orchestrator = state.orchestrator.clone();
    let modules = tokio::task::spawn_blocking(move || orchestrator.installed_modules())
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(modules))
}

/// Drop finished jobs from the tracker and report what is still running.
async fn retention_clean(State(state): State<Arc<AppState>>) -> Json<Value> {
    let removed = state.tracker.clean().await;
    let running = state.tracker.running().await;
    tracing::info!(removed, running = running.len(), "Job tracker cleaned");
    Json(json!({ "removed": removed, "running": running }))
}
