use super::{page, parse_uuid, Listing};
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use relique::catalog::ImageFilter;
use relique::Image;
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_images))
        .route("/{uuid}", get(get_image))
}

#[derive(Debug, Default, Deserialize)]
pub struct ImagesQuery {
    pub client_name: Option<String>,
    pub module_type: Option<String>,
    pub repo_name: Option<String>,
    pub uuid: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ImagesQuery {
    fn filter(&self) -> Result<ImageFilter, AppError> {
        Ok(ImageFilter {
            client_name: self.client_name.clone(),
            module_type: self.module_type.clone(),
            repo_name: self.repo_name.clone(),
            uuid: self.uuid.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

async fn list_images(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImagesQuery>,
) -> Result<Json<Listing<Image>>, AppError> {
    let filter = query.filter()?;
    let (items, total) = state
        .orchestrator
        .images(filter, page(query.limit, query.offset))
        .await?;
    Ok(Json(Listing { items, total }))
}

async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<Image>, AppError> {
    let uuid = parse_uuid(&uuid)?;
    Ok(Json(state.orchestrator.image(uuid).await?))
}
