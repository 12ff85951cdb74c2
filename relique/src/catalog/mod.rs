//! Catalog store: the `jobs` and `images` index in SQLite plus the per-job
//! bundles on disk.
//!
//! All writes go through [`CatalogStore::transaction`], which holds the
//! store's write lock for the duration of one SQLite transaction. When a row
//! and its bundle are written together the bundle is flushed before the
//! commit, so the disk always holds at least what the index references.
//!
//! Every method blocks; async callers go through `spawn_blocking`.

pub mod bundle;
pub mod connection;
pub mod filter;
pub mod images;
pub mod jobs;
pub mod migrate;

pub use bundle::CatalogBundle;
pub use connection::DbPool;
pub use filter::{ImageFilter, JobFilter, Page};

use crate::config::CoreConfig;
use crate::image::Image;
use crate::job::Job;
use crate::module::BackupMode;
use crate::sync::SyncStats;
use crate::utils::{Error, Result, ResultExt};
use images::ImageRow;
use jobs::JobRow;
use rusqlite::{Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone)]
pub struct CatalogStore {
    pool: DbPool,
    root: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl CatalogStore {
    /// Open (and migrate) the database and use `catalog_root` for bundles.
    pub fn open(db_file: &Path, catalog_root: &Path) -> Result<Self> {
        let pool = connection::create_pool(db_file)?;
        migrate::migrate(&pool)?;
        std::fs::create_dir_all(catalog_root)
            .with_context(|| format!("create catalog folder {}", catalog_root.display()))?;

        tracing::info!(db = %db_file.display(), catalog = %catalog_root.display(), "Catalog opened");
        Ok(Self {
            pool,
            root: catalog_root.to_path_buf(),
            writer: Arc::new(Mutex::new(())),
        })
    }

    pub fn from_config(core: &CoreConfig) -> Result<Self> {
        CatalogStore::open(&core.db_file(), &core.catalog_path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle(&self, uuid: &Uuid) -> CatalogBundle {
        CatalogBundle::new(&self.root, uuid)
    }

    /// Run `f` inside one write transaction. Commits when `f` succeeds; the
    /// transaction rolls back when dropped otherwise.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let _guard = self
            .writer
            .lock()
            .map_err(|_| Error::Fatal("catalog write lock poisoned".into()))?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Upsert the job row. The bundle is left untouched.
    pub fn save_job(&self, job: &mut Job) -> Result<()> {
        let row = JobRow::from_job(job)?;
        let id = self
            .transaction(|tx| jobs::upsert(tx, &row))
            .with_context(|| format!("save job {}", job.uuid))?;
        job.id = Some(id);
        Ok(())
    }

    /// Upsert the job row and write its bundle in the same transaction.
    pub fn register_job(&self, job: &mut Job) -> Result<()> {
        let row = JobRow::from_job(job)?;
        let bundle = self.bundle(&job.uuid);
        let id = self
            .transaction(|tx| {
                let id = jobs::upsert(tx, &row)?;
                bundle.write_entities(&job.module, &job.client, &job.repository)?;
                Ok(id)
            })
            .with_context(|| format!("register job {}", job.uuid))?;
        job.id = Some(id);
        Ok(())
    }

    pub fn write_stats(&self, uuid: &Uuid, stats: &SyncStats) -> Result<()> {
        self.bundle(uuid).write_stats(stats)
    }

    pub fn job_exists(&self, uuid: &Uuid) -> Result<bool> {
        let conn = self.pool.get()?;
        jobs::exists(&conn, &uuid.to_string())
    }

    pub fn job_by_uuid(&self, uuid: &Uuid) -> Result<Job> {
        let conn = self.pool.get()?;
        let row = jobs::find_by_uuid(&conn, &uuid.to_string())?
            .ok_or_else(|| Error::NotFound(format!("job {uuid}")))?;
        self.hydrate_job(row)
    }

    fn hydrate_job(&self, row: JobRow) -> Result<Job> {
        let uuid = jobs::parse_uuid(&row.uuid)?;
        let bundle = self.bundle(&uuid);
        let stats = bundle.stats()?.unwrap_or_default();
        row.into_job(bundle.client()?, bundle.module()?, bundle.repository()?, stats)
            .with_context(|| format!("load job {uuid}"))
    }

    pub fn search_jobs(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        let rows = {
            let conn = self.pool.get()?;
            jobs::search(&conn, filter, page)?
        };

        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let uuid = row.uuid.clone();
            match self.hydrate_job(row) {
                Ok(job) => found.push(job),
                Err(e) => tracing::warn!(job_uuid = %uuid, error = %e, "Skipping job with unreadable catalog bundle"),
            }
        }
        Ok(found)
    }

    pub fn count_jobs(&self, filter: &JobFilter) -> Result<u64> {
        let conn = self.pool.get()?;
        jobs::count(&conn, filter)
    }

    /// Most recent done job of the same client and module type taken with
    /// `target`. `NotFound` when there is none.
    pub fn previous_job(&self, job: &Job, target: BackupMode) -> Result<Job> {
        let row = {
            let conn = self.pool.get()?;
            jobs::find_previous(&conn, &job.client.name, &job.module.module_type, target)?
        };
        match row {
            Some(row) => self.hydrate_job(row),
            None => Err(Error::NotFound(format!(
                "previous {} job for client '{}' and module type '{}'",
                target, job.client.name, job.module.module_type
            ))),
        }
    }

    /// Close every job a previous process left unfinished.
    pub fn mark_interrupted_jobs(&self) -> Result<Vec<Uuid>> {
        let now = chrono::Utc::now().to_rfc3339();
        let uuids = self.transaction(|tx| jobs::mark_interrupted(tx, &now))?;
        for uuid in &uuids {
            tracing::warn!(job_uuid = %uuid, "Job was interrupted, marked as error");
        }
        uuids.iter().map(|u| jobs::parse_uuid(u)).collect()
    }

    pub fn save_image(&self, image: &mut Image) -> Result<()> {
        let row = ImageRow::from_image(image);
        let id = self
            .transaction(|tx| images::upsert(tx, &row))
            .with_context(|| format!("save image {}", image.uuid))?;
        image.id = Some(id);
        Ok(())
    }

    /// Load an image with the entities recorded when it was taken.
    pub fn image_by_uuid(&self, uuid: &Uuid) -> Result<Image> {
        let conn = self.pool.get()?;
        let row = images::find_by_uuid(&conn, &uuid.to_string())?
            .ok_or_else(|| Error::NotFound(format!("image {uuid}")))?;
        self.hydrate_image(row)
    }

    fn hydrate_image(&self, row: ImageRow) -> Result<Image> {
        let uuid = jobs::parse_uuid(&row.uuid)?;
        let bundle = self.bundle(&uuid);
        row.into_image(bundle.client()?, bundle.module()?, bundle.repository()?)
            .with_context(|| format!("load image {uuid}"))
    }

    pub fn search_images(&self, filter: &ImageFilter, page: Page) -> Result<Vec<Image>> {
        let rows = {
            let conn = self.pool.get()?;
            images::search(&conn, filter, page)?
        };

        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let uuid = row.uuid.clone();
            match self.hydrate_image(row) {
                Ok(image) => found.push(image),
                Err(e) => tracing::warn!(image_uuid = %uuid, error = %e, "Skipping image with unreadable catalog bundle"),
            }
        }
        Ok(found)
    }

    pub fn count_images(&self, filter: &ImageFilter) -> Result<u64> {
        let conn = self.pool.get()?;
        images::count(&conn, filter)
    }
}
