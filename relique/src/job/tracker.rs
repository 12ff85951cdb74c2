//! In-memory registry of the jobs this process is running.

use crate::job::{JobKind, JobStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Snapshot of one tracked job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedJob {
    pub uuid: Uuid,
    pub kind: JobKind,
    pub client_name: String,
    pub started_at: DateTime<Utc>,
    /// Set once the job has finished
    pub status: Option<JobStatus>,
    pub cancel_requested: bool,
}

/// Finished jobs kept for status queries before the oldest are forgotten
pub const DEFAULT_FINISHED_LIMIT: usize = 256;

struct Entry {
    info: TrackedJob,
    cancel: CancellationToken,
    /// Completion order, set once finished
    finished: Option<u64>,
}

/// Tracks running jobs and provides their cancellation tokens
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<Uuid, Entry>>>,
    completions: Arc<AtomicU64>,
    finished_limit: usize,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::with_finished_limit(DEFAULT_FINISHED_LIMIT)
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that remembers at most `limit` finished jobs
    pub fn with_finished_limit(limit: usize) -> Self {
        Self {
            jobs: Arc::default(),
            completions: Arc::default(),
            finished_limit: limit,
        }
    }

    /// Register a job and return the token its execution must observe
    pub async fn register(&self, uuid: Uuid, kind: JobKind, client_name: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        let entry = Entry {
            info: TrackedJob {
                uuid,
                kind,
                client_name: client_name.to_string(),
                started_at: Utc::now(),
                status: None,
                cancel_requested: false,
            },
            cancel: cancel.clone(),
            finished: None,
        };

        let mut jobs = self.jobs.write().await;
        jobs.insert(uuid, entry);
        cancel
    }

    /// Request cancellation. False when the job is unknown or already finished.
    pub async fn cancel(&self, uuid: &Uuid) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(uuid) {
            Some(entry) if entry.info.status.is_none() => {
                entry.info.cancel_requested = true;
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Record the final status of a job, forgetting the oldest finished
    /// jobs beyond the limit
    pub async fn complete(&self, uuid: &Uuid, status: JobStatus) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(uuid) else {
            return;
        };
        if entry.finished.is_none() {
            entry.finished = Some(self.completions.fetch_add(1, Ordering::Relaxed));
        }
        entry.info.status = Some(status);

        let mut finished: Vec<(u64, Uuid)> = jobs
            .iter()
            .filter_map(|(uuid, e)| e.finished.map(|seq| (seq, *uuid)))
            .collect();
        if finished.len() <= self.finished_limit {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.finished_limit;
        for (_, uuid) in finished.into_iter().take(excess) {
            jobs.remove(&uuid);
        }
        tracing::debug!(dropped = excess, "Forgot oldest finished jobs");
    }

    pub async fn get(&self, uuid: &Uuid) -> Option<TrackedJob> {
        let jobs = self.jobs.read().await;
        jobs.get(uuid).map(|e| e.info.clone())
    }

    /// Jobs still running, oldest first
    pub async fn running(&self) -> Vec<TrackedJob> {
        let jobs = self.jobs.read().await;
        let mut running: Vec<_> = jobs
            .values()
            .filter(|e| e.info.status.is_none())
            .map(|e| e.info.clone())
            .collect();
        running.sort_by_key(|j| j.started_at);
        running
    }

    /// Forget finished jobs; returns how many were dropped
    pub async fn clean(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, e| e.info.status.is_none());
        before - jobs.len()
    }

    /// Cancel everything still running, used on shutdown
    pub async fn cancel_all(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let mut cancelled = 0;
        for entry in jobs.values_mut().filter(|e| e.info.status.is_none()) {
            entry.info.cancel_requested = true;
            entry.cancel.cancel();
            cancelled += 1;
        }
        cancelled
    }
}
