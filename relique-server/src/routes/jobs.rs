use super::{page, parse_uuid, Listing};
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use relique::catalog::JobFilter;
use relique::job::tracker::TrackedJob;
use relique::{BackupMode, Job, JobKind, JobStatus};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/backup", post(start_backup))
        .route("/restore", post(start_restore))
        .route("/running", get(running_jobs))
        .route("/{uuid}", get(get_job))
        .route("/{uuid}/cancel", post(cancel_job))
}

#[derive(Debug, Deserialize)]
pub struct BackupRequest {
    pub client: String,
    pub module: String,
    pub repository: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub image_uuid: Uuid,
    pub client: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    pub client_name: Option<String>,
    pub module_type: Option<String>,
    pub status: Option<String>,
    pub kind: Option<String>,
    pub mode: Option<String>,
    pub uuid: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl JobsQuery {
    fn filter(&self) -> Result<JobFilter, AppError> {
        let mode = match self.mode.as_deref() {
            None => None,
            Some(token) => {
                let mode = BackupMode::parse(token);
                if !mode.is_known() {
                    return Err(AppError::BadRequest(format!("unknown backup mode '{token}'")));
                }
                Some(mode)
            }
        };

        Ok(JobFilter {
            client_name: self.client_name.clone(),
            module_type: self.module_type.clone(),
            status: self.status.as_deref().map(JobStatus::parse).transpose()?,
            kind: self.kind.as_deref().map(JobKind::parse).transpose()?,
            mode,
            uuid: self.uuid.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

/// Register the job with the tracker and run it in the background. Returns
/// the job as it was before setup.
async fn launch(state: Arc<AppState>, mut job: Job) -> Job {
    let snapshot = job.clone();
    let cancel = state
        .tracker
        .register(job.uuid, job.kind, &job.client.name)
        .await;

    tokio::spawn(async move {
        let uuid = job.uuid;
        match state.orchestrator.run(&mut job, &cancel).await {
            Ok(()) => tracing::info!(job_uuid = %uuid, status = %job.status, "Job finished"),
            Err(e) => tracing::error!(job_uuid = %uuid, status = %job.status, "Job failed: {e}"),
        }
        state.tracker.complete(&uuid, job.status).await;
    });

    snapshot
}

async fn start_backup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BackupRequest>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    let job = state.orchestrator.new_backup_job(
        &body.client,
        &body.module,
        body.repository.as_deref(),
    )?;
    let job = launch(state, job).await;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn start_restore(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RestoreRequest>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    let job = state
        .orchestrator
        .new_restore_job(body.image_uuid, body.client.as_deref(), &body.paths)
        .await?;
    let job = launch(state, job).await;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Listing<Job>>, AppError> {
    let filter = query.filter()?;
    let (items, total) = state
        .orchestrator
        .jobs(filter, page(query.limit, query.offset))
        .await?;
    Ok(Json(Listing { items, total }))
}

async fn running_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<TrackedJob>> {
    Json(state.tracker.running().await)
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<Job>, AppError> {
    let uuid = parse_uuid(&uuid)?;
    Ok(Json(state.orchestrator.job(uuid).await?))
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let uuid = parse_uuid(&uuid)?;
    if state.tracker.cancel(&uuid).await {
        tracing::info!(job_uuid = %uuid, "Cancellation requested");
        return Ok(Json(serde_json::json!({ "cancelled": true })));
    }

    match state.tracker.get(&uuid).await {
        Some(job) => Err(AppError::Conflict(format!(
            "job {uuid} already finished ({})",
            job.status.map(|s| s.as_str()).unwrap_or("unknown")
        ))),
        None => Err(AppError::NotFound(format!("job {uuid} is not running"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_to_filter() {
        let query = JobsQuery {
            client_name: Some("c1".into()),
            status: Some("success".into()),
            kind: Some("backup".into()),
            mode: Some("incremental".into()),
            ..JobsQuery::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.client_name.as_deref(), Some("c1"));
        assert_eq!(filter.status, Some(JobStatus::Success));
        assert_eq!(filter.kind, Some(JobKind::Backup));
        assert_eq!(filter.mode, Some(BackupMode::Incremental));
    }

    #[test]
    fn test_query_rejects_bad_tokens() {
        let bad_mode = JobsQuery {
            mode: Some("weekly".into()),
            ..JobsQuery::default()
        };
        assert!(matches!(bad_mode.filter(), Err(AppError::BadRequest(_))));

        let bad_status = JobsQuery {
            status: Some("done".into()),
            ..JobsQuery::default()
        };
        assert!(matches!(bad_status.filter(), Err(AppError::BadRequest(_))));

        let bad_uuid = JobsQuery {
            uuid: Some("not-a-uuid".into()),
            ..JobsQuery::default()
        };
        assert!(matches!(bad_uuid.filter(), Err(AppError::BadRequest(_))));
    }
}
