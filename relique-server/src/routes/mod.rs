pub mod images;
pub mod jobs;
pub mod system;

use crate::error::AppError;
use crate::state::AppState;
use axum::Router;
use relique::catalog::Page;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/jobs", jobs::router())
        .nest("/api/images", images::router())
        .merge(system::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// One page of a listing together with the total number of matches.
#[derive(Debug, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub total: u64,
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("invalid uuid '{raw}'")))
}

pub(crate) fn page(limit: Option<u32>, offset: Option<u32>) -> Page {
    Page {
        limit,
        offset: offset.unwrap_or(0),
    }
}
