//! Scripted device and host used by tests across the workspace.
//!
//! `SimDevice` models a storage volume whose usage grows on every batch copy
//! (`cp -r`) and shrinks on every batch removal (`rm -rf …batch-*`), so the
//! occupancy loop can run against it end to end. Occupancy readings can also
//! be scripted outright.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::{Device, DeviceFuture};
use crate::error::{DeviceError, DeviceResult};
use crate::host::{HostFuture, HostShell};

pub const DEFAULT_DEVICE_TIMING: &str = "0m00.22s real     0m00.10s user     0m00.05s system";

pub const DEFAULT_HOST_TIMING: &str = "0.46user 0.01system 0:00.47elapsed 99%CPU (0avgtext+0avgdata 5120maxresident)k\n\
0inputs+0outputs (0major+412minor)pagefaults 0swaps\n";

pub const DEFAULT_PROFILE_DUMP: &str = "---- begin\n\
     1        1204        1204    0 Init             0   13    0\n\
    20       48211        2410    1 OpenRead         0    2    0\n\
    20        3000         150    2 Column           0    1    1\n\
---- end\n";

struct SimState {
    used: u64,
    total: u64,
    fill_per_batch: u64,
    drain_per_batch: u64,
    drain_failure: Option<String>,
    scripted: VecDeque<f64>,
    responses: Vec<(String, String)>,
    failures: Vec<(String, String)>,
    pull_failure: Option<String>,
    device_timing: String,
    snapshot: Vec<u8>,
    commands: Vec<String>,
    pushes: Vec<(PathBuf, String)>,
    pulls: Vec<(String, PathBuf)>,
    reboots: u32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            used: 0,
            total: 10_000,
            fill_per_batch: 0,
            drain_per_batch: 0,
            drain_failure: None,
            scripted: VecDeque::new(),
            responses: Vec::new(),
            failures: Vec::new(),
            pull_failure: None,
            device_timing: DEFAULT_DEVICE_TIMING.to_string(),
            snapshot: b"SQLite format 3\0".to_vec(),
            commands: Vec::new(),
            pushes: Vec::new(),
            pulls: Vec::new(),
            reboots: 0,
        }
    }
}

/// In-memory device. Clones share state, so a test can keep one clone for
/// inspection after handing another to a `DeviceHandle`.
#[derive(Clone, Default)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set used and total 1K-blocks of the volume.
    pub fn with_storage(self, used: u64, total: u64) -> Self {
        {
            let mut s = self.state();
            s.used = used;
            s.total = total;
        }
        self
    }

    /// Blocks added by each batch copy.
    pub fn with_fill_per_batch(self, blocks: u64) -> Self {
        self.state().fill_per_batch = blocks;
        self
    }

    /// Blocks freed by each batch removal.
    pub fn with_drain_per_batch(self, blocks: u64) -> Self {
        self.state().drain_per_batch = blocks;
        self
    }

    /// Script occupancy readings, in percent. The last reading repeats once
    /// the script runs out.
    pub fn script_occupancy(&self, readings: impl IntoIterator<Item = f64>) {
        self.state().scripted = readings.into_iter().collect();
    }

    /// Make batch removals fail, as when the time budget expires.
    pub fn fail_drains(&self, message: &str) {
        self.state().drain_failure = Some(message.to_string());
    }

    /// Answer commands containing `pattern` with `output`.
    pub fn respond(&self, pattern: &str, output: &str) {
        self.state()
            .responses
            .push((pattern.to_string(), output.to_string()));
    }

    /// Fail commands containing `pattern`.
    pub fn fail_on(&self, pattern: &str, message: &str) {
        self.state()
            .failures
            .push((pattern.to_string(), message.to_string()));
    }

    pub fn fail_pulls(&self, message: &str) {
        self.state().pull_failure = Some(message.to_string());
    }

    pub fn set_device_timing(&self, line: &str) {
        self.state().device_timing = line.to_string();
    }

    /// Bytes written to disk for every pull.
    pub fn set_snapshot_bytes(&self, bytes: Vec<u8>) {
        self.state().snapshot = bytes;
    }

    pub fn used(&self) -> u64 {
        self.state().used
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn pushes(&self) -> Vec<(PathBuf, String)> {
        self.state().pushes.clone()
    }

    pub fn pulls(&self) -> Vec<(String, PathBuf)> {
        self.state().pulls.clone()
    }

    pub fn reboots(&self) -> u32 {
        self.state().reboots
    }

    fn run(&self, command: &str) -> DeviceResult<String> {
        let mut s = self.state();
        s.commands.push(command.to_string());

        if let Some((_, message)) = s.failures.iter().find(|(p, _)| command.contains(p.as_str())) {
            return Err(DeviceError::Command {
                command: command.to_string(),
                code: 1,
                output: message.clone(),
            });
        }

        if command.starts_with("df ") {
            return Ok(s.df());
        }

        if command.contains("rm -rf") && command.contains("batch-") {
            if let Some(message) = s.drain_failure.clone() {
                return Err(DeviceError::Command {
                    command: command.to_string(),
                    code: 124,
                    output: message,
                });
            }
            s.used = s.used.saturating_sub(s.drain_per_batch);
        } else if command.contains("cp -r") {
            s.used = (s.used + s.fill_per_batch).min(s.total);
        }

        if let Some((_, output)) = s.responses.iter().find(|(p, _)| command.contains(p.as_str())) {
            return Ok(output.clone());
        }

        if command.contains("time sqlite3") {
            return Ok(format!("{}\n", s.device_timing));
        }

        Ok(String::new())
    }
}

impl SimState {
    fn df(&mut self) -> String {
        if let Some(next) = self.scripted.front().copied() {
            if self.scripted.len() > 1 {
                self.scripted.pop_front();
            }
            self.total = 10_000;
            self.used = (next * 100.0).round() as u64;
        }
        let available = self.total.saturating_sub(self.used);
        format!(
            "Filesystem     1K-blocks    Used Available Use% Mounted on\n\
             /dev/fuse      {} {} {} {}% /storage/emulated\n",
            self.total,
            self.used,
            available,
            if self.total == 0 { 0 } else { self.used * 100 / self.total }
        )
    }
}

impl Device for SimDevice {
    fn id(&self) -> Option<&str> {
        Some("sim-0")
    }

    fn shell<'a>(&'a self, command: &'a str) -> DeviceFuture<'a, String> {
        Box::pin(async move { self.run(command) })
    }

    fn push<'a>(&'a self, local: &'a Path, remote: &'a str) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            self.state()
                .pushes
                .push((local.to_path_buf(), remote.to_string()));
            Ok(())
        })
    }

    fn pull<'a>(&'a self, remote: &'a str, local: &'a Path) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            let bytes = {
                let mut s = self.state();
                s.pulls.push((remote.to_string(), local.to_path_buf()));
                if let Some(message) = s.pull_failure.clone() {
                    return Err(DeviceError::Unavailable(message));
                }
                s.snapshot.clone()
            };
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(local, bytes).await?;
            Ok(())
        })
    }

    fn reboot(&self) -> DeviceFuture<'_, ()> {
        Box::pin(async move {
            self.state().reboots += 1;
            Ok(())
        })
    }
}

struct HostState {
    commands: Vec<(String, PathBuf)>,
    output: String,
    profile: Option<String>,
    failures: Vec<String>,
}

/// Host shell that answers every command with a fixed GNU `time` report
/// and, like an instrumented sqlite3, appends a profile dump to
/// `vdbe_profile.out` in the working directory.
#[derive(Clone)]
pub struct ScriptedHost {
    state: Arc<Mutex<HostState>>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                commands: Vec::new(),
                output: DEFAULT_HOST_TIMING.to_string(),
                profile: Some(DEFAULT_PROFILE_DUMP.to_string()),
                failures: Vec::new(),
            })),
        }
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stop writing a profile dump.
    pub fn without_profile(self) -> Self {
        self.state().profile = None;
        self
    }

    pub fn set_output(&self, output: &str) {
        self.state().output = output.to_string();
    }

    pub fn fail_on(&self, pattern: &str) {
        self.state().failures.push(pattern.to_string());
    }

    pub fn commands(&self) -> Vec<(String, PathBuf)> {
        self.state().commands.clone()
    }
}

impl HostShell for ScriptedHost {
    fn exec<'a>(&'a self, command: &'a str, cwd: &'a Path) -> HostFuture<'a> {
        Box::pin(async move {
            let (output, profile) = {
                let mut s = self.state();
                s.commands.push((command.to_string(), cwd.to_path_buf()));
                if s.failures.iter().any(|p| command.contains(p.as_str())) {
                    return Err(DeviceError::Command {
                        command: command.to_string(),
                        code: 1,
                        output: "Error: near line 1: syntax error".to_string(),
                    });
                }
                (s.output.clone(), s.profile.clone())
            };

            if let Some(dump) = profile {
                use tokio::io::AsyncWriteExt;
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(cwd.join("vdbe_profile.out"))
                    .await?;
                file.write_all(dump.as_bytes()).await?;
            }
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceHandle;

    #[tokio::test]
    async fn batch_copies_grow_usage() {
        let sim = SimDevice::new().with_storage(1_000, 10_000).with_fill_per_batch(500);
        let mut handle = DeviceHandle::new(Box::new(sim.clone()), "/storage/emulated/0");
        assert_eq!(handle.occupancy().await.unwrap(), 10.0);
        handle.shell("cp -r /sdcard/DCIM/batch/. /sdcard/DCIM/batch-1").await.unwrap();
        assert_eq!(handle.occupancy().await.unwrap(), 15.0);
    }

    #[tokio::test]
    async fn scripted_readings_repeat_last() {
        let sim = SimDevice::new();
        sim.script_occupancy([12.5, 40.0]);
        let mut handle = DeviceHandle::new(Box::new(sim), "/storage/emulated/0");
        assert_eq!(handle.occupancy().await.unwrap(), 12.5);
        assert_eq!(handle.occupancy().await.unwrap(), 40.0);
        assert_eq!(handle.occupancy().await.unwrap(), 40.0);
    }

    #[tokio::test]
    async fn scripted_host_appends_profile_dump() {
        let dir = tempfile::tempdir().unwrap();
        let host = ScriptedHost::new();
        host.exec("sqlite3 x", dir.path()).await.unwrap();
        host.exec("sqlite3 x", dir.path()).await.unwrap();
        let dump = std::fs::read_to_string(dir.path().join("vdbe_profile.out")).unwrap();
        assert_eq!(dump.matches("---- begin").count(), 2);
    }
}
