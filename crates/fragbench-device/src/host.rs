//! Local process facade used for host-side query replays.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use fragbench_core::config::HostConfig;

use crate::error::{DeviceError, DeviceResult};

pub type HostFuture<'a> = Pin<Box<dyn Future<Output = DeviceResult<String>> + Send + 'a>>;

/// Runs a shell command on this machine and returns stdout and stderr merged.
pub trait HostShell: Send + Sync {
    fn exec<'a>(&'a self, command: &'a str, cwd: &'a Path) -> HostFuture<'a>;
}

/// `HostShell` backed by `bash -c`.
#[derive(Debug, Clone)]
pub struct BashShell {
    shell: String,
    timeout: Duration,
}

impl BashShell {
    pub fn new(shell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(
            config.shell.clone(),
            Duration::from_secs(config.command_timeout_secs),
        )
    }
}

impl HostShell for BashShell {
    fn exec<'a>(&'a self, command: &'a str, cwd: &'a Path) -> HostFuture<'a> {
        Box::pin(async move {
            debug!(%command, cwd = %cwd.display(), "host exec");
            let merged = format!("{{ {command} ; }} 2>&1");
            let child = Command::new(&self.shell)
                .arg("-c")
                .arg(&merged)
                .current_dir(cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output();

            let output = tokio::time::timeout(self.timeout, child)
                .await
                .map_err(|_| DeviceError::Timeout {
                    command: command.to_string(),
                    secs: self.timeout.as_secs(),
                })?
                .map_err(|e| DeviceError::Spawn {
                    program: self.shell.clone(),
                    reason: e.to_string(),
                })?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.status.success() {
                return Err(DeviceError::Command {
                    command: command.to_string(),
                    code: output.status.code().unwrap_or(-1),
                    output: stdout,
                });
            }
            Ok(stdout)
        })
    }
}
