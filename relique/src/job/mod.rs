//! Backup and restore jobs.
//!
//! A job is created `pending`, prepared by [`JobEngine::setup_backup`] or
//! [`JobEngine::setup_restore`], then executed by [`JobEngine::start`] which
//! moves it through `active` to a terminal status.

mod execute;
pub mod restore_paths;
mod setup;
pub mod tracker;

pub use restore_paths::parse_restore_paths;
pub use setup::JobEngine;
pub use tracker::JobTracker;

use crate::client::Client;
use crate::image::Image;
use crate::module::{BackupMode, Module};
use crate::repository::{Repository, Storage};
use crate::sync::{SyncStats, SyncTask};
use crate::utils::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Module name recorded by restores that use a custom path mapping.
pub const ON_DEMAND_MODULE: &str = "on-demand";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Backup,
    Restore,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backup => "backup",
            JobKind::Restore => "restore",
        }
    }

    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "backup" => Ok(JobKind::Backup),
            "restore" => Ok(JobKind::Restore),
            other => Err(Error::Invalid(format!("job kind '{other}'"))),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Success,
    Incomplete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Success => "success",
            JobStatus::Incomplete => "incomplete",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "pending" => Ok(JobStatus::Pending),
            "active" => Ok(JobStatus::Active),
            "success" => Ok(JobStatus::Success),
            "incomplete" => Ok(JobStatus::Incomplete),
            "error" => Ok(JobStatus::Error),
            other => Err(Error::Invalid(format!("job status '{other}'"))),
        }
    }

    /// Statuses a done job may carry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Incomplete | JobStatus::Error
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    /// Catalog insertion key, set once the job has been saved
    #[serde(skip)]
    pub id: Option<i64>,

    pub uuid: Uuid,
    pub kind: JobKind,

    /// Backup strategy, `None` for restores
    pub mode: Option<BackupMode>,

    pub status: JobStatus,
    pub done: bool,
    pub client: Client,
    pub module: Module,
    pub repository: Repository,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    /// Reference job of an incremental backup
    pub previous_job_uuid: Option<Uuid>,

    /// Image a restore reads from
    pub restore_image_uuid: Option<Uuid>,

    /// Image-side source path to client-side destination
    pub custom_restore_paths: BTreeMap<String, String>,

    #[serde(skip)]
    pub tasks: Vec<SyncTask>,

    pub stats: SyncStats,
}

impl Job {
    pub fn new_backup(client: Client, module: Module, repository: Repository) -> Self {
        let mode = module.mode;
        Job {
            id: None,
            uuid: Uuid::new_v4(),
            kind: JobKind::Backup,
            mode: Some(mode),
            status: JobStatus::Pending,
            done: false,
            client,
            module,
            repository,
            start_time: None,
            end_time: None,
            previous_job_uuid: None,
            restore_image_uuid: None,
            custom_restore_paths: BTreeMap::new(),
            tasks: Vec::new(),
            stats: SyncStats::default(),
        }
    }

    /// Restore `image` onto `target`. The module and repository are the ones
    /// the image was taken with.
    pub fn new_restore(
        image: &Image,
        target: Client,
        restore_paths: BTreeMap<String, String>,
    ) -> Self {
        let mut module = image.module.clone();
        if !restore_paths.is_empty() {
            module.name = ON_DEMAND_MODULE.to_string();
        }

        Job {
            id: None,
            uuid: Uuid::new_v4(),
            kind: JobKind::Restore,
            mode: None,
            status: JobStatus::Pending,
            done: false,
            client: target,
            module,
            repository: image.repository.clone(),
            start_time: None,
            end_time: None,
            previous_job_uuid: None,
            restore_image_uuid: Some(image.uuid),
            custom_restore_paths: restore_paths,
            tasks: Vec::new(),
            stats: SyncStats::default(),
        }
    }

    /// Display token of the job strategy: the backup mode, or `restore`.
    pub fn mode_label(&self) -> &'static str {
        match (self.kind, self.mode) {
            (JobKind::Restore, _) => "restore",
            (JobKind::Backup, Some(mode)) => mode.as_str(),
            (JobKind::Backup, None) => BackupMode::Unknown.as_str(),
        }
    }

    /// Root of this job's data and logs inside its repository.
    pub fn storage_path(&self) -> Result<PathBuf> {
        self.repository.storage_path(&self.uuid)
    }

    /// Wall-clock time spent running, up to now for a job still active.
    pub fn duration(&self) -> chrono::Duration {
        match self.start_time {
            None => chrono::Duration::zero(),
            Some(start) => self.end_time.unwrap_or_else(Utc::now) - start,
        }
    }

    pub(crate) fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.done = true;
        self.end_time = Some(Utc::now());
    }
}
