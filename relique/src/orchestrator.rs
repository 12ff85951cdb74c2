//! In-process API used by the server: build jobs from the loaded
//! configuration, run them, and query the catalog.

use crate::catalog::{CatalogStore, ImageFilter, JobFilter, Page};
use crate::config::Configuration;
use crate::image::Image;
use crate::job::{parse_restore_paths, Job, JobEngine, JobKind};
use crate::module::Module;
use crate::utils::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// An installed module template and its parameter files
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledModule {
    pub module: Module,
    pub variants: Vec<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Configuration>,
    engine: JobEngine,
}

impl Orchestrator {
    pub fn new(config: Configuration, catalog: CatalogStore) -> Self {
        let engine = JobEngine::new(catalog, &config.core);
        Self {
            config: Arc::new(config),
            engine,
        }
    }

    /// Open the catalog the configuration points at.
    pub fn open(config: Configuration) -> Result<Self> {
        let catalog = CatalogStore::from_config(&config.core)?;
        Ok(Orchestrator::new(config, catalog))
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn engine(&self) -> &JobEngine {
        &self.engine
    }

    /// Close jobs a previous process left running.
    pub async fn recover(&self) -> Result<Vec<Uuid>> {
        self.engine
            .blocking(|catalog| catalog.mark_interrupted_jobs())
            .await
    }

    /// Backup of `module_name` on `client_name` into the named repository,
    /// or the default one.
    pub fn new_backup_job(
        &self,
        client_name: &str,
        module_name: &str,
        repository_name: Option<&str>,
    ) -> Result<Job> {
        let client = self.config.client(client_name)?;
        let module = client.module(module_name)?.clone();
        let repository = self.config.repository(repository_name)?.clone();
        Ok(Job::new_backup(client.clone(), module, repository))
    }

    /// Restore of an image. The target defaults to the client the image was
    /// taken from.
    pub async fn new_restore_job(
        &self,
        image_uuid: Uuid,
        client_name: Option<&str>,
        raw_paths: &[String],
    ) -> Result<Job> {
        let image = self.image(image_uuid).await?;

        let target = match client_name {
            Some(name) => self.config.client(name)?.clone(),
            None => self
                .config
                .client(&image.client.name)
                .cloned()
                .unwrap_or_else(|_| image.client.clone()),
        };

        let paths = parse_restore_paths(raw_paths, &image.module.backup_paths)?;
        Ok(Job::new_restore(&image, target, paths))
    }

    /// Set up, check the client and run. Backups are registered before the
    /// client is pinged; restores are only set up once it answered.
    pub async fn run(&self, job: &mut Job, cancel: &CancellationToken) -> Result<()> {
        match job.kind {
            JobKind::Backup => {
                self.engine.setup_backup(job).await?;
                self.engine.execute(job, cancel).await
            }
            JobKind::Restore => {
                self.engine.check_reachable(job).await?;
                self.engine.setup_restore(job).await?;
                self.engine.start(job, cancel).await
            }
        }
    }

    /// One page of jobs, most recent first, with the total matching count.
    pub async fn jobs(&self, filter: JobFilter, page: Page) -> Result<(Vec<Job>, u64)> {
        self.engine
            .blocking(move |catalog| {
                let total = catalog.count_jobs(&filter)?;
                let items = catalog.search_jobs(&filter, page)?;
                Ok((items, total))
            })
            .await
    }

    pub async fn job(&self, uuid: Uuid) -> Result<Job> {
        self.engine
            .blocking(move |catalog| catalog.job_by_uuid(&uuid))
            .await
    }

    pub async fn images(&self, filter: ImageFilter, page: Page) -> Result<(Vec<Image>, u64)> {
        self.engine
            .blocking(move |catalog| {
                let total = catalog.count_images(&filter)?;
                let items = catalog.search_images(&filter, page)?;
                Ok((items, total))
            })
            .await
    }

    pub async fn image(&self, uuid: Uuid) -> Result<Image> {
        self.engine
            .blocking(move |catalog| catalog.image_by_uuid(&uuid))
            .await
    }

    /// Templates under the install root; none when the root does not exist.
    pub fn installed_modules(&self) -> Result<Vec<InstalledModule>> {
        let root = &self.config.core.module_install_path;
        if !root.is_dir() {
            tracing::warn!(path = %root.display(), "Module install folder not found");
            return Ok(Vec::new());
        }
        Module::installed(root)?
            .into_iter()
            .map(|module| {
                let variants = module.available_variants(root)?;
                Ok(InstalledModule { module, variants })
            })
            .collect()
    }
}
