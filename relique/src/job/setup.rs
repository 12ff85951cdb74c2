use crate::catalog::CatalogStore;
use crate::config::{CoreConfig, SyncConfig};
use crate::job::{Job, JobKind, JobStatus};
use crate::module::{BackupMode, Hook};
use crate::reachability::SshProbe;
use crate::sync::{assign_unique_logs, remote_shell, SyncTask};
use crate::utils::{Error, Result, ResultExt};
use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Prepares and runs jobs against one catalog.
#[derive(Clone)]
pub struct JobEngine {
    pub(super) catalog: CatalogStore,
    pub(super) sync: SyncConfig,
    pub(super) install_root: PathBuf,
    pub(super) probe: SshProbe,
}

impl JobEngine {
    pub fn new(catalog: CatalogStore, core: &CoreConfig) -> Self {
        Self {
            catalog,
            sync: core.sync.clone(),
            install_root: core.module_install_path.clone(),
            probe: SshProbe::from_config(&core.sync),
        }
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    /// Run a catalog operation on the blocking pool.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(CatalogStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || f(catalog))
            .await
            .map_err(|e| Error::Fatal(format!("catalog task failed: {e}")))?
    }

    /// Save the job row, and its bundle too when `with_bundle` is set.
    pub(super) async fn persist(&self, job: &mut Job, with_bundle: bool) -> Result<()> {
        let tasks = std::mem::take(&mut job.tasks);
        let mut snapshot = job.clone();
        job.tasks = tasks;

        let id = self
            .blocking(move |catalog| {
                if with_bundle {
                    catalog.register_job(&mut snapshot)?;
                } else {
                    catalog.save_job(&mut snapshot)?;
                }
                Ok(snapshot.id)
            })
            .await?;
        job.id = id;
        Ok(())
    }

    /// End a job that could not run: `error`, done, persisted with its
    /// bundle when possible.
    pub(super) async fn abort(&self, job: &mut Job, error: &Error) {
        job.finish(JobStatus::Error);
        tracing::error!(job_uuid = %job.uuid, error = %error, "Job failed before execution");

        if let Err(e) = self.persist(job, true).await {
            tracing::warn!(job_uuid = %job.uuid, error = %e, "Cannot register failed job, saving its row only");
            if let Err(e) = self.persist(job, false).await {
                tracing::error!(job_uuid = %job.uuid, error = %e, "Cannot save failed job");
            }
        }
    }

    async fn ensure_new(&self, job: &Job) -> Result<()> {
        let uuid = job.uuid;
        if self.blocking(move |catalog| catalog.job_exists(&uuid)).await? {
            return Err(Error::Invalid(format!("job {uuid}: already set up")));
        }
        Ok(())
    }

    /// Resolve the reference job, create the storage folders, build one sync
    /// task per backup path and register the job.
    ///
    /// A job whose uuid is already in the catalog is rejected without being
    /// touched. Any later failure ends the job in `error`.
    pub async fn setup_backup(&self, job: &mut Job) -> Result<()> {
        if job.kind != JobKind::Backup {
            return Err(Error::Invalid(format!("job {}: not a backup", job.uuid)));
        }
        self.ensure_new(job).await?;

        if let Err(e) = self.plan_backup(job).await {
            let e = e.context(format!("setup backup job {}", job.uuid));
            self.abort(job, &e).await;
            return Err(e);
        }

        tracing::info!(
            job_uuid = %job.uuid,
            client = %job.client.name,
            module = %job.module.name,
            mode = job.mode_label(),
            tasks = job.tasks.len(),
            "Backup job ready"
        );
        Ok(())
    }

    async fn plan_backup(&self, job: &mut Job) -> Result<()> {
        job.client.validate()?;
        job.module.validate()?;
        ensure_distinct(&job.module.backup_paths)?;

        let reference = self.resolve_reference(job).await?;
        let storage = self.create_storage(job, true).await?;
        let rsh = remote_shell(&self.sync.ssh_path, &job.client);

        job.tasks = match &reference {
            Some(previous) => {
                let previous_data = previous.storage_path()?.join("_data");
                job.module
                    .backup_paths
                    .iter()
                    .map(|bp| {
                        SyncTask::incremental_backup(
                            &job.client,
                            &job.module,
                            bp,
                            &storage,
                            &previous_data,
                            &rsh,
                        )
                    })
                    .collect()
            }
            None => job
                .module
                .backup_paths
                .iter()
                .map(|bp| SyncTask::full_backup(&job.client, &job.module, bp, &storage, &rsh))
                .collect(),
        };
        assign_unique_logs(&mut job.tasks);

        self.check_hooks(job, &[Hook::PreBackup, Hook::PostBackup]);
        self.persist(job, true).await
    }

    /// Pick the job an incremental backup links against: the latest
    /// incremental, else the latest full. Without either the job becomes full.
    async fn resolve_reference(&self, job: &mut Job) -> Result<Option<Job>> {
        if job.mode != Some(BackupMode::Incremental) {
            return Ok(None);
        }

        for target in [BackupMode::Incremental, BackupMode::Full] {
            let mut query = job.clone();
            query.tasks.clear();
            match self
                .blocking(move |catalog| catalog.previous_job(&query, target))
                .await
            {
                Ok(previous) => {
                    tracing::info!(
                        job_uuid = %job.uuid,
                        previous_job_uuid = %previous.uuid,
                        previous_mode = %target,
                        "Reference job found"
                    );
                    job.previous_job_uuid = Some(previous.uuid);
                    return Ok(Some(previous));
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(job_uuid = %job.uuid, target = %target, "No reference job");
                }
                Err(e) => return Err(e.context("look up reference job")),
            }
        }

        tracing::info!(
            job_uuid = %job.uuid,
            "No previous incremental or full job found, switching this job to full"
        );
        job.mode = Some(BackupMode::Full);
        job.previous_job_uuid = None;
        Ok(None)
    }

    /// Create `${storage}/` (which must not exist yet), `_logs/` and, for
    /// backups, `_data/`.
    async fn create_storage(&self, job: &Job, with_data: bool) -> Result<PathBuf> {
        let storage = job.storage_path()?;
        if let Some(root) = storage.parent() {
            tokio::fs::create_dir_all(root)
                .await
                .with_context(|| format!("create repository folder {}", root.display()))?;
        }

        match tokio::fs::create_dir(&storage).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::Invalid(format!(
                    "job storage {}: already exists",
                    storage.display()
                )))
            }
            Err(e) => {
                return Err(Error::from(e).context(format!("create job storage {}", storage.display())))
            }
        }

        let mut folders = vec!["_logs"];
        if with_data {
            folders.push("_data");
        }
        for folder in folders {
            let path = storage.join(folder);
            tokio::fs::create_dir(&path)
                .await
                .with_context(|| format!("create {}", path.display()))?;
        }
        Ok(storage)
    }

    fn check_hooks(&self, job: &Job, hooks: &[Hook]) {
        for hook in hooks {
            if let Some(script) = job.module.hook(*hook, &self.install_root) {
                if script.is_file() {
                    tracing::debug!(job_uuid = %job.uuid, hook = ?hook, script = %script.display(), "Module declares a hook script");
                } else {
                    tracing::warn!(job_uuid = %job.uuid, hook = ?hook, script = %script.display(), "Module hook script not found");
                }
            }
        }
    }

    /// Resolve the source image, build one restore task per restored path
    /// and register the job.
    pub async fn setup_restore(&self, job: &mut Job) -> Result<()> {
        if job.kind != JobKind::Restore {
            return Err(Error::Invalid(format!("job {}: not a restore", job.uuid)));
        }
        self.ensure_new(job).await?;

        if let Err(e) = self.plan_restore(job).await {
            let e = e.context(format!("setup restore job {}", job.uuid));
            self.abort(job, &e).await;
            return Err(e);
        }

        tracing::info!(
            job_uuid = %job.uuid,
            client = %job.client.name,
            tasks = job.tasks.len(),
            "Restore job ready"
        );
        Ok(())
    }

    async fn plan_restore(&self, job: &mut Job) -> Result<()> {
        let image_uuid = job
            .restore_image_uuid
            .ok_or_else(|| Error::Invalid("restore job: no image to restore from".into()))?;
        job.client.validate()?;
        ensure_distinct(&job.module.backup_paths)?;

        let source_job = self
            .blocking(move |catalog| catalog.job_by_uuid(&image_uuid))
            .await
            .context("load restore source")?;
        let source_data = source_job.storage_path()?.join("_data");

        let storage = self.create_storage(job, false).await?;
        let rsh = remote_shell(&self.sync.ssh_path, &job.client);

        let mapping: BTreeMap<String, String> = if job.custom_restore_paths.is_empty() {
            job.module
                .backup_paths
                .iter()
                .map(|bp| (bp.clone(), bp.clone()))
                .collect()
        } else {
            job.custom_restore_paths.clone()
        };

        let mut tasks = Vec::with_capacity(mapping.len());
        for (source, destination) in &mapping {
            let source_uri = restore_source(&source_data, source).await;
            tasks.push(SyncTask::restore(
                &job.client,
                &job.module,
                source,
                source_uri,
                destination,
                &storage,
                &rsh,
            ));
        }
        assign_unique_logs(&mut tasks);
        job.tasks = tasks;

        self.check_hooks(job, &[Hook::PreRestore, Hook::PostRestore]);
        self.persist(job, true).await
    }
}

/// Reject a path listed twice; `/srv/data/` and `/srv/data` are the same.
fn ensure_distinct(paths: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for path in paths {
        let key = path.trim_end_matches('/');
        if !seen.insert(key) {
            return Err(Error::Invalid(format!("backup path '{path}': listed twice")));
        }
    }
    Ok(())
}

/// Location of `path` inside an image's data tree. Directories get a trailing
/// slash so their content, not the directory itself, lands at the destination.
async fn restore_source(data_root: &Path, path: &str) -> String {
    let location = data_root.join(path.trim_start_matches('/'));
    let is_dir = tokio::fs::metadata(&location)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let mut uri = location.to_string_lossy().trim_end_matches('/').to_string();
    if is_dir {
        uri.push('/');
    }
    uri
}
