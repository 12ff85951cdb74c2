//! Client reachability check over ssh.
//!
//! Runs `echo 'ping'` on the client in batch mode, so that a missing key or
//! an unknown host fails fast instead of prompting.

use crate::client::Client;
use crate::config::SyncConfig;
use crate::utils::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshProbe {
    ssh_path: PathBuf,
    connect_timeout: Duration,
}

impl SshProbe {
    pub fn new(ssh_path: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            ssh_path: ssh_path.into(),
            connect_timeout,
        }
    }

    pub fn from_config(sync: &SyncConfig) -> Self {
        SshProbe::new(&sync.ssh_path, sync.connect_timeout())
    }

    pub fn args(&self, client: &Client) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-p".into(),
            client.ssh_port.to_string(),
            format!("{}@{}", client.ssh_user, client.address),
            "echo 'ping'".into(),
        ]
    }

    /// `Ok(())` when ssh exits 0 without writing to stderr.
    pub async fn check(&self, client: &Client) -> Result<()> {
        tracing::debug!(client = %client.name, args = ?self.args(client), "Pinging client over ssh");

        let run = Command::new(&self.ssh_path)
            .args(self.args(client))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // ssh's own ConnectTimeout only covers the TCP connection
        let limit = self.connect_timeout + Duration::from_secs(5);
        let output = match tokio::time::timeout(limit, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::Transport(format!(
                    "cannot run {}: {e}",
                    self.ssh_path.display()
                )))
            }
            Err(_) => {
                return Err(Error::Transport(format!(
                    "ssh ping to '{}' timed out after {}s",
                    client.name,
                    limit.as_secs()
                )))
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(Error::Transport(format!(
                "cannot ping client '{}' via ssh: {stderr}",
                client.name
            )));
        }
        if !stderr.is_empty() {
            return Err(Error::Transport(format!(
                "cannot ping client '{}' via ssh: '{stderr}'",
                client.name
            )));
        }

        tracing::info!(client = %client.name, "Client ssh ping successful");
        Ok(())
    }
}
