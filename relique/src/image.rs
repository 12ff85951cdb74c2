//! Images: the persisted result of a backup that reached `success` or
//! `incomplete`.
//!
//! An image shares its UUID and storage tree with the job that produced it
//! and carries copies of the client, module and repository used at the time.

use crate::client::Client;
use crate::fs::walker::{disk_usage, DiskUsage};
use crate::job::{Job, JobKind};
use crate::module::Module;
use crate::repository::Repository;
use crate::sync::SyncStats;
use crate::utils::{Error, Result, ResultExt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Image {
    #[serde(skip)]
    pub id: Option<i64>,

    pub uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub client: Client,
    pub module: Module,
    pub repository: Repository,

    /// Entries reported by the sync tool
    pub number_of_elements: u64,
    pub number_of_files: u64,
    pub number_of_folders: u64,

    /// Bytes used by the image's data tree
    pub size_on_disk: u64,

    pub storage_path: PathBuf,
}

impl Image {
    pub fn from_job(job: &Job) -> Result<Self> {
        if job.kind != JobKind::Backup {
            return Err(Error::Invalid(format!(
                "image source: job {} is not a backup",
                job.uuid
            )));
        }

        Ok(Image {
            id: None,
            uuid: job.uuid,
            created_at: Utc::now(),
            client: job.client.clone(),
            module: job.module.clone(),
            repository: job.repository.clone(),
            number_of_elements: 0,
            number_of_files: 0,
            number_of_folders: 0,
            size_on_disk: 0,
            storage_path: job.storage_path()?,
        })
    }

    pub fn fill_stats(&mut self, stats: &SyncStats) {
        self.number_of_elements = stats.number_of_files;
        self.number_of_files = stats.number_of_regular_files;
        self.number_of_folders = stats.number_of_directories;
    }

    /// Walk `_data/` and record its size. Blocking.
    pub fn measure(&mut self) -> Result<DiskUsage> {
        let data = self.data_path();
        let usage =
            disk_usage(&data).with_context(|| format!("measure {}", data.display()))?;
        self.size_on_disk = usage.bytes;
        Ok(usage)
    }

    pub fn data_path(&self) -> PathBuf {
        self.storage_path.join("_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::BackupMode;
    use tempfile::TempDir;

    fn job_in(root: &std::path::Path) -> Job {
        Job::new_backup(
            Client::new("c1", "1.2.3.4"),
            Module::new("generic", "data", BackupMode::Full),
            Repository::local("local", root, true),
        )
    }

    #[test]
    fn test_image_from_job_and_stats() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path());

        let mut image = Image::from_job(&job).unwrap();
        assert_eq!(image.uuid, job.uuid);
        assert_eq!(image.storage_path, dir.path().join(job.uuid.to_string()));

        image.fill_stats(&SyncStats {
            number_of_files: 10,
            number_of_regular_files: 7,
            number_of_directories: 3,
            ..SyncStats::default()
        });
        assert_eq!(
            (image.number_of_elements, image.number_of_files, image.number_of_folders),
            (10, 7, 3)
        );
    }

    #[test]
    fn test_measure_data_tree() {
        let dir = TempDir::new().unwrap();
        let job = job_in(dir.path());
        let mut image = Image::from_job(&job).unwrap();

        assert_eq!(image.measure().unwrap(), DiskUsage::default());

        let data = image.data_path().join("srv/data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("a.txt"), b"hello").unwrap();
        image.measure().unwrap();
        assert_eq!(image.size_on_disk, 5);
    }

    #[test]
    fn test_restore_job_has_no_image() {
        let dir = TempDir::new().unwrap();
        let image = Image::from_job(&job_in(dir.path())).unwrap();
        let restore = Job::new_restore(&image, Client::new("c2", "h"), Default::default());
        assert_eq!(
            Image::from_job(&restore).unwrap_err().kind(),
            crate::ErrorKind::Invalid
        );
    }
}
