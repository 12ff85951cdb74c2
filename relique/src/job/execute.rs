use crate::image::Image;
use crate::job::{Job, JobKind, JobStatus, JobEngine};
use crate::sync::progress::format_bytes;
use crate::sync::{SyncProgress, SyncStats, SyncTask, TaskOutcome};
use crate::utils::{Error, Result, ResultExt};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

impl JobEngine {
    /// Ping the job's client. An unreachable client ends the job in `error`.
    pub async fn check_reachable(&self, job: &mut Job) -> Result<()> {
        if let Err(e) = self.probe.check(&job.client).await {
            let e = e.context(format!("client '{}' is unreachable", job.client.name));
            self.abort(job, &e).await;
            return Err(e);
        }
        Ok(())
    }

    /// [`JobEngine::check_reachable`], then [`JobEngine::start`].
    pub async fn execute(&self, job: &mut Job, cancel: &CancellationToken) -> Result<()> {
        self.check_reachable(job).await?;
        self.start(job, cancel).await
    }

    /// Run every sync task of a set-up job in parallel and record the result.
    ///
    /// Returns `Partial` when some task only partially transferred and
    /// `Transport` when one failed; the job is persisted in its terminal
    /// status in both cases. A backup that ends `success` or `incomplete`
    /// produces an image.
    pub async fn start(&self, job: &mut Job, cancel: &CancellationToken) -> Result<()> {
        if job.status != JobStatus::Pending || job.done {
            return Err(Error::Invalid(format!(
                "job {}: cannot start from status {}",
                job.uuid, job.status
            )));
        }

        job.status = JobStatus::Active;
        job.start_time = Some(Utc::now());
        if let Err(e) = self.persist(job, false).await {
            let e = e.context(format!("start job {}", job.uuid));
            self.abort(job, &e).await;
            return Err(e);
        }

        tracing::info!(
            job_uuid = %job.uuid,
            kind = %job.kind,
            mode = job.mode_label(),
            tasks = job.tasks.len(),
            "Starting job file sync"
        );

        let tasks = std::mem::take(&mut job.tasks);
        let expected = tasks.len();
        let logs: Vec<_> = tasks
            .iter()
            .map(|t| (t.backup_path.clone(), t.log_file.clone()))
            .collect();

        let stop = CancellationToken::new();
        let ticker = tokio::spawn(heartbeat(
            job.uuid,
            logs,
            self.sync.heartbeat_interval(),
            stop.clone(),
        ));

        let mut set = JoinSet::new();
        for (index, mut task) in tasks.into_iter().enumerate() {
            let rsync = self.sync.rsync_path.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                task.run(&rsync, &cancel).await;
                (index, task)
            });
        }

        let mut finished: Vec<Option<SyncTask>> = (0..expected).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, task)) => finished[index] = Some(task),
                Err(e) => tracing::error!(job_uuid = %job.uuid, error = %e, "Sync task aborted"),
            }
        }

        stop.cancel();
        if let Err(e) = ticker.await {
            tracing::warn!(job_uuid = %job.uuid, error = %e, "Heartbeat task failed");
        }

        job.tasks = finished.into_iter().flatten().collect();
        let lost = expected - job.tasks.len();
        for task in &job.tasks {
            let s = &task.stats;
            tracing::info!(
                job_uuid = %job.uuid,
                backup_path = %task.backup_path,
                elements = s.number_of_files,
                files = s.number_of_regular_files,
                folders = s.number_of_directories,
                total_file_size = %format_bytes(s.total_file_size),
                literal_data = s.literal_data,
                matched_data = s.matched_data,
                total_bytes_sent = s.total_bytes_sent,
                total_bytes_received = s.total_bytes_received,
                transfer_speed = s.transfer_speed,
                speedup = s.speedup,
                "File sync complete"
            );
        }

        let status = roll_up(&job.tasks, lost);
        job.stats = SyncStats::merge(job.tasks.iter().map(|t| &t.stats));
        job.finish(status);

        self.persist(job, false)
            .await
            .with_context(|| format!("save finished job {}", job.uuid))?;

        let (uuid, stats) = (job.uuid, job.stats.clone());
        self.blocking(move |catalog| catalog.write_stats(&uuid, &stats))
            .await
            .with_context(|| format!("write statistics of job {}", job.uuid))?;

        tracing::info!(
            job_uuid = %job.uuid,
            status = %job.status,
            duration_secs = job.duration().num_seconds(),
            "Job finished"
        );

        if job.kind == JobKind::Backup && matches!(status, JobStatus::Success | JobStatus::Incomplete) {
            self.emit_image(job).await?;
        } else if job.kind == JobKind::Backup {
            tracing::info!(job_uuid = %job.uuid, "No image generated for unsuccessful job");
        }

        outcome(job, lost)
    }

    async fn emit_image(&self, job: &Job) -> Result<()> {
        let mut image = Image::from_job(job)?;
        image.fill_stats(&job.stats);

        let image = self
            .blocking(move |catalog| {
                image.measure()?;
                catalog.save_image(&mut image)?;
                Ok(image)
            })
            .await
            .with_context(|| format!("create image of job {}", job.uuid))?;

        tracing::info!(
            image_uuid = %image.uuid,
            elements = image.number_of_elements,
            size_on_disk = %format_bytes(image.size_on_disk),
            "Image created"
        );
        Ok(())
    }
}

/// `error` if any task failed or was lost, else `incomplete` if any only
/// partially transferred, else `success`.
fn roll_up(tasks: &[SyncTask], lost: usize) -> JobStatus {
    let failed = lost > 0
        || tasks
            .iter()
            .any(|t| !matches!(t.outcome, Some(TaskOutcome::Success | TaskOutcome::Incomplete { .. })));
    if failed {
        return JobStatus::Error;
    }
    if tasks
        .iter()
        .any(|t| matches!(t.outcome, Some(TaskOutcome::Incomplete { .. })))
    {
        return JobStatus::Incomplete;
    }
    JobStatus::Success
}

fn outcome(job: &Job, lost: usize) -> Result<()> {
    match job.status {
        JobStatus::Incomplete => {
            let partial: Vec<_> = job
                .tasks
                .iter()
                .filter(|t| matches!(t.outcome, Some(TaskOutcome::Incomplete { .. })))
                .map(|t| t.backup_path.as_str())
                .collect();
            Err(Error::Partial(format!(
                "job {}: incomplete transfer of {}",
                job.uuid,
                partial.join(", ")
            )))
        }
        JobStatus::Error => {
            let mut reasons: Vec<String> = job
                .tasks
                .iter()
                .filter_map(|t| match &t.outcome {
                    Some(TaskOutcome::Error { reason }) => {
                        Some(format!("{}: {}", t.backup_path, reason))
                    }
                    _ => None,
                })
                .collect();
            if lost > 0 {
                reasons.push(format!("{lost} task(s) aborted"));
            }
            Err(Error::Transport(format!(
                "job {}: {}",
                job.uuid,
                reasons.join("; ")
            )))
        }
        _ => Ok(()),
    }
}

/// Log the progress of every task at a fixed interval until `stop` fires.
async fn heartbeat(
    job_uuid: Uuid,
    logs: Vec<(String, PathBuf)>,
    period: Duration,
    stop: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.cancelled() => { break; }
        }

        for (backup_path, log) in &logs {
            match SyncProgress::from_log_tail(log).await {
                Ok(Some(p)) => tracing::info!(
                    job_uuid = %job_uuid,
                    backup_path = %backup_path,
                    progress = p.percent,
                    current = p.current,
                    remaining = p.remaining,
                    total = p.total,
                    speed_kbps = p.speed_kbps,
                    "File sync in progress"
                ),
                Ok(None) => tracing::debug!(job_uuid = %job_uuid, backup_path = %backup_path, "File sync starting"),
                // log not created yet
                Err(_) => {}
            }
        }
    }
}
