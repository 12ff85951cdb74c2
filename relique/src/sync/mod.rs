//! Sync subtasks: one rsync process per backup path.
//!
//! A task owns two log files under the job's `_logs/` folder. rsync writes
//! straight into them, which lets the heartbeat read progress while the
//! process runs. Statistics are parsed from the stdout log once the process
//! has exited.

pub mod options;
pub mod progress;
pub mod stats;

pub use options::SyncOptions;
pub use progress::SyncProgress;
pub use stats::SyncStats;

use crate::client::Client;
use crate::module::Module;
use crate::utils::{slug, Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Classification of a finished rsync process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// Exit codes 23 to 25: partial transfer, vanished source files or the
    /// `--max-delete` limit. Data may still be on disk.
    Incomplete { exit_code: i32 },
    Error { reason: String },
}

impl TaskOutcome {
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => TaskOutcome::Success,
            Some(code @ 23..=25) => TaskOutcome::Incomplete { exit_code: code },
            Some(code) => TaskOutcome::Error {
                reason: format!("rsync exited with status {code}"),
            },
            None => TaskOutcome::Error {
                reason: "rsync was terminated by a signal".into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncTask {
    /// Client-side path this task is about
    pub backup_path: String,
    pub source: String,
    pub destination: String,
    pub log_file: PathBuf,
    pub error_log_file: PathBuf,
    pub options: SyncOptions,
    pub stats: SyncStats,
    pub outcome: Option<TaskOutcome>,
}

/// Remote shell passed to rsync for `client`.
pub fn remote_shell(ssh_path: &Path, client: &Client) -> String {
    format!("{} -p {}", ssh_path.display(), client.ssh_port)
}

fn log_files(job_storage: &Path, backup_path: &str) -> (PathBuf, PathBuf) {
    log_files_named(&job_storage.join("_logs"), &slug(backup_path))
}

fn log_files_named(logs: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        logs.join(format!("rsync_log_{name}.log")),
        logs.join(format!("rsync_log_error_{name}.log")),
    )
}

/// Give every task its own log files. Paths whose slugs collide (`/srv/data`,
/// `/srv/Data`, `/srv_data`) keep the first name; later ones get `-2`, `-3`...
pub fn assign_unique_logs(tasks: &mut [SyncTask]) {
    let mut used = HashSet::new();
    for task in tasks {
        let base = slug(&task.backup_path);
        let mut name = base.clone();
        let mut n = 1;
        while used.contains(&name) {
            n += 1;
            name = format!("{base}-{n}");
        }
        if n > 1 {
            if let Some(logs) = task.log_file.parent().map(Path::to_path_buf) {
                (task.log_file, task.error_log_file) = log_files_named(&logs, &name);
            }
        }
        used.insert(name);
    }
}

fn data_dir_uri(dir: &Path) -> String {
    format!("{}/", dir.display())
}

impl SyncTask {
    fn new(
        backup_path: &str,
        source: String,
        destination: String,
        job_storage: &Path,
        options: SyncOptions,
    ) -> Self {
        let (log_file, error_log_file) = log_files(job_storage, backup_path);
        Self {
            backup_path: backup_path.to_string(),
            source,
            destination,
            log_file,
            error_log_file,
            options,
            stats: SyncStats::default(),
            outcome: None,
        }
    }

    /// Pull `backup_path` from the client into `${job_storage}/_data/`.
    pub fn full_backup(
        client: &Client,
        module: &Module,
        backup_path: &str,
        job_storage: &Path,
        rsh: &str,
    ) -> Self {
        SyncTask::new(
            backup_path,
            client.remote(backup_path),
            data_dir_uri(&job_storage.join("_data")),
            job_storage,
            SyncOptions::full_backup().with_filters(module).with_rsh(rsh),
        )
    }

    /// Like [`SyncTask::full_backup`], hard-linking unchanged files against
    /// `previous_data`.
    pub fn incremental_backup(
        client: &Client,
        module: &Module,
        backup_path: &str,
        job_storage: &Path,
        previous_data: &Path,
        rsh: &str,
    ) -> Self {
        SyncTask::new(
            backup_path,
            client.remote(backup_path),
            data_dir_uri(&job_storage.join("_data")),
            job_storage,
            SyncOptions::incremental_backup(data_dir_uri(previous_data))
                .with_filters(module)
                .with_rsh(rsh),
        )
    }

    /// Push `source` (already resolved inside an image) to `destination` on
    /// the client.
    pub fn restore(
        client: &Client,
        module: &Module,
        backup_path: &str,
        source: String,
        destination: &str,
        job_storage: &Path,
        rsh: &str,
    ) -> Self {
        SyncTask::new(
            backup_path,
            source,
            client.remote(destination),
            job_storage,
            SyncOptions::restore().with_filters(module).with_rsh(rsh),
        )
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = self.options.to_args();
        args.push(self.source.clone());
        args.push(self.destination.clone());
        args
    }

    /// Run rsync to completion, then parse statistics and classify the exit.
    ///
    /// Failures to spawn are reported through the outcome, never as an
    /// error, so that sibling tasks keep running.
    pub async fn run(&mut self, rsync_path: &Path, cancel: &CancellationToken) -> TaskOutcome {
        let outcome = match self.execute(rsync_path, cancel).await {
            Ok(code) => TaskOutcome::from_exit_code(code),
            Err(e) => TaskOutcome::Error {
                reason: e.to_string(),
            },
        };

        match SyncStats::from_log_file(&self.log_file) {
            Ok(stats) => self.stats = stats,
            Err(e) => tracing::warn!(backup_path = %self.backup_path, error = %e, "No statistics for sync task"),
        }

        match &outcome {
            TaskOutcome::Success => {
                tracing::info!(backup_path = %self.backup_path, files = self.stats.number_of_files, "Sync task finished");
            }
            TaskOutcome::Incomplete { exit_code } => {
                tracing::warn!(
                    backup_path = %self.backup_path,
                    exit_code,
                    stderr = %self.error_excerpt(),
                    "Sync task finished with a partial transfer"
                );
            }
            TaskOutcome::Error { reason } => {
                tracing::error!(
                    backup_path = %self.backup_path,
                    reason = %reason,
                    stderr = %self.error_excerpt(),
                    "Sync task failed"
                );
            }
        }

        self.outcome = Some(outcome.clone());
        outcome
    }

    async fn execute(&self, rsync_path: &Path, cancel: &CancellationToken) -> Result<Option<i32>> {
        if cancel.is_cancelled() {
            return Err(Error::Fatal("job cancelled before the task started".into()));
        }

        let stdout = std::fs::File::create(&self.log_file)?;
        let stderr = std::fs::File::create(&self.error_log_file)?;

        tracing::debug!(backup_path = %self.backup_path, args = ?self.args(), "Spawning rsync");
        let mut child = Command::new(rsync_path)
            .args(self.args())
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transport(format!("cannot spawn {}: {e}", rsync_path.display())))?;

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                if let Some(pid) = child.id() {
                    tracing::info!(backup_path = %self.backup_path, pid, "Terminating rsync");
                    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                        tracing::warn!(pid, error = %e, "Failed to signal rsync");
                    }
                }
                child.wait().await?
            }
        };

        Ok(status.code())
    }

    /// First lines of the error log, on one line.
    pub fn error_excerpt(&self) -> String {
        std::fs::read_to_string(&self.error_log_file)
            .map(|text| {
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .take(3)
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::BackupMode;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fixture() -> (Client, Module) {
        let client = Client::new("c1", "1.2.3.4");
        let mut module = Module::new("generic", "m", BackupMode::Full);
        module.backup_paths = vec!["/srv/data".into()];
        (client, module)
    }

    fn stub(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("rsync-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_exit_code_classification() {
        assert_eq!(TaskOutcome::from_exit_code(Some(0)), TaskOutcome::Success);
        for code in [23, 24, 25] {
            assert_eq!(
                TaskOutcome::from_exit_code(Some(code)),
                TaskOutcome::Incomplete { exit_code: code }
            );
        }
        assert!(matches!(TaskOutcome::from_exit_code(Some(12)), TaskOutcome::Error { .. }));
        assert!(matches!(TaskOutcome::from_exit_code(Some(22)), TaskOutcome::Error { .. }));
        assert!(matches!(TaskOutcome::from_exit_code(None), TaskOutcome::Error { .. }));
    }

    #[test]
    fn test_backup_task_layout() {
        let (client, module) = fixture();
        let storage = Path::new("/var/lib/relique/storage/job");
        let task = SyncTask::incremental_backup(
            &client,
            &module,
            "/srv/data",
            storage,
            Path::new("/var/lib/relique/storage/prev/_data"),
            "ssh -p 22",
        );

        assert_eq!(task.source, "relique@1.2.3.4:/srv/data");
        assert_eq!(task.destination, "/var/lib/relique/storage/job/_data/");
        assert_eq!(task.log_file, storage.join("_logs/rsync_log_srv-data.log"));
        assert_eq!(task.error_log_file, storage.join("_logs/rsync_log_error_srv-data.log"));

        let args = task.args();
        assert!(args.contains(&"--link-dest=/var/lib/relique/storage/prev/_data/".to_string()));
        assert_eq!(&args[args.len() - 2..], &[task.source.clone(), task.destination.clone()]);
    }

    #[test]
    fn test_colliding_slugs_get_distinct_logs() {
        let (client, module) = fixture();
        let storage = Path::new("/st/job");
        let mut tasks: Vec<_> = ["/srv/data", "/srv/Data", "/srv_data", "/srv/data-2"]
            .into_iter()
            .map(|bp| SyncTask::full_backup(&client, &module, bp, storage, "ssh"))
            .collect();
        assign_unique_logs(&mut tasks);

        let logs: Vec<_> = tasks.iter().map(|t| t.log_file.clone()).collect();
        assert_eq!(logs[0], storage.join("_logs/rsync_log_srv-data.log"));
        assert_eq!(logs[1], storage.join("_logs/rsync_log_srv-data-2.log"));
        assert_eq!(logs[2], storage.join("_logs/rsync_log_srv-data-3.log"));
        // a real path that slugs to an already used suffix
        assert_eq!(logs[3], storage.join("_logs/rsync_log_srv-data-2-2.log"));
        assert_eq!(
            tasks[1].error_log_file,
            storage.join("_logs/rsync_log_error_srv-data-2.log")
        );

        let distinct: HashSet<_> = tasks.iter().map(|t| &t.error_log_file).collect();
        assert_eq!(distinct.len(), tasks.len());
    }

    #[test]
    fn test_restore_task_layout() {
        let (client, module) = fixture();
        let task = SyncTask::restore(
            &client,
            &module,
            "/srv/data",
            "/storage/img/_data/srv/data/".into(),
            "/tmp/recovery",
            Path::new("/storage/restore-job"),
            "ssh -p 22",
        );
        assert_eq!(task.destination, "relique@1.2.3.4:/tmp/recovery");
        assert!(task.args().contains(&"--delete-after".to_string()));
    }

    #[tokio::test]
    async fn test_run_captures_logs_and_stats() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("_logs")).unwrap();
        let rsync = stub(
            dir.path(),
            "echo 'Number of files: 3 (reg: 2, dir: 1)'\necho 'some file vanished' >&2\nexit 24",
        );

        let (client, module) = fixture();
        let mut task = SyncTask::full_backup(&client, &module, "/srv/data", dir.path(), "ssh");
        let outcome = task.run(&rsync, &CancellationToken::new()).await;

        assert_eq!(outcome, TaskOutcome::Incomplete { exit_code: 24 });
        assert_eq!(task.outcome, Some(outcome));
        assert_eq!(task.stats.number_of_files, 3);
        assert_eq!(task.stats.number_of_directories, 1);
        assert_eq!(task.error_excerpt(), "some file vanished");
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error_outcome() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("_logs")).unwrap();

        let (client, module) = fixture();
        let mut task = SyncTask::full_backup(&client, &module, "/srv/data", dir.path(), "ssh");
        let outcome = task
            .run(&dir.path().join("no-such-rsync"), &CancellationToken::new())
            .await;

        match outcome {
            TaskOutcome::Error { reason } => assert!(reason.contains("cannot spawn")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_terminates_running_process() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("_logs")).unwrap();
        let rsync = stub(dir.path(), "exec sleep 30");

        let (client, module) = fixture();
        let mut task = SyncTask::full_backup(&client, &module, "/srv/data", dir.path(), "ssh");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = task.run(&rsync, &cancel).await;
        assert!(matches!(outcome, TaskOutcome::Error { .. }));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
