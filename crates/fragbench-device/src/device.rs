//! Device facade trait and the single-owner handle wrapped around it.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::Serialize;
use tracing::{debug, warn};

use fragbench_core::StorageUsage;

use crate::error::{DeviceError, DeviceResult};

/// Boxed future alias for device operations.
pub type DeviceFuture<'a, T> = Pin<Box<dyn Future<Output = DeviceResult<T>> + Send + 'a>>;

/// Remote command channel to one device.
///
/// Implementations must bound every call by their own command timeout and
/// report connectivity loss as [`DeviceError::Unavailable`].
pub trait Device: Send + Sync {
    /// Identifier of the connected device, if any.
    fn id(&self) -> Option<&str>;

    /// Run a shell command on the device and return its stdout.
    fn shell<'a>(&'a self, command: &'a str) -> DeviceFuture<'a, String>;

    /// Copy a local file or directory onto the device.
    fn push<'a>(&'a self, local: &'a Path, remote: &'a str) -> DeviceFuture<'a, ()>;

    /// Copy a remote file onto this machine.
    fn pull<'a>(&'a self, remote: &'a str, local: &'a Path) -> DeviceFuture<'a, ()>;

    fn reboot(&self) -> DeviceFuture<'_, ()>;

    /// Block usage of `volume`, read from `df`.
    fn storage_usage<'a>(&'a self, volume: &'a str) -> DeviceFuture<'a, StorageUsage> {
        Box::pin(async move {
            let command = format!("df {volume}");
            let raw = self.shell(&command).await?;
            Ok(StorageUsage::parse_df(&raw)?)
        })
    }

    /// Flush dirty pages and drop the page, dentry and inode caches.
    fn drop_cache(&self) -> DeviceFuture<'_, ()> {
        Box::pin(async move {
            self.shell("sync; echo 3 > /proc/sys/vm/drop_caches").await?;
            Ok(())
        })
    }
}

/// Stand-in used while no device is connected.
#[derive(Debug, Clone)]
pub struct Detached {
    reason: String,
}

impl Detached {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T: Send + 'static>(&self) -> DeviceFuture<'static, T> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(DeviceError::Unavailable(reason)) })
    }
}

impl Device for Detached {
    fn id(&self) -> Option<&str> {
        None
    }

    fn shell<'a>(&'a self, _command: &'a str) -> DeviceFuture<'a, String> {
        self.fail()
    }

    fn push<'a>(&'a self, _local: &'a Path, _remote: &'a str) -> DeviceFuture<'a, ()> {
        self.fail()
    }

    fn pull<'a>(&'a self, _remote: &'a str, _local: &'a Path) -> DeviceFuture<'a, ()> {
        self.fail()
    }

    fn reboot(&self) -> DeviceFuture<'_, ()> {
        self.fail()
    }
}

/// Exclusive handle to the device under test.
///
/// Every operation takes `&mut self`, so whoever holds the handle is the
/// only party able to issue device commands. Share it behind a
/// `tokio::sync::Mutex` and hold the guard for the duration of a run.
pub struct DeviceHandle {
    device: Box<dyn Device>,
    volume: String,
}

impl DeviceHandle {
    /// Wrap a device whose occupancy is measured on `volume`.
    pub fn new(device: Box<dyn Device>, volume: impl Into<String>) -> Self {
        Self {
            device,
            volume: volume.into(),
        }
    }

    /// A handle with no device behind it.
    pub fn detached(reason: impl Into<String>, volume: impl Into<String>) -> Self {
        Self::new(Box::new(Detached::new(reason)), volume)
    }

    pub fn id(&self) -> Option<&str> {
        self.device.id()
    }

    pub fn volume(&self) -> &str {
        &self.volume
    }

    /// Swap in another device, returning the previous one.
    pub fn replace(&mut self, device: Box<dyn Device>) -> Box<dyn Device> {
        std::mem::replace(&mut self.device, device)
    }

    pub async fn shell(&mut self, command: &str) -> DeviceResult<String> {
        debug!(%command, "device shell");
        self.device.shell(command).await
    }

    pub async fn push(&mut self, local: &Path, remote: &str) -> DeviceResult<()> {
        debug!(local = %local.display(), %remote, "device push");
        self.device.push(local, remote).await
    }

    pub async fn pull(&mut self, remote: &str, local: &Path) -> DeviceResult<()> {
        debug!(%remote, local = %local.display(), "device pull");
        self.device.pull(remote, local).await
    }

    pub async fn reboot(&mut self) -> DeviceResult<()> {
        self.device.reboot().await
    }

    pub async fn storage_usage(&mut self) -> DeviceResult<StorageUsage> {
        self.device.storage_usage(&self.volume).await
    }

    /// Current occupancy of the target volume, in percent.
    pub async fn occupancy(&mut self) -> DeviceResult<f64> {
        Ok(self.storage_usage().await?.percent()?)
    }

    pub async fn drop_cache(&mut self) -> DeviceResult<()> {
        self.device.drop_cache().await
    }
}

/// Outcome of an operation whose failure is logged and tolerated.
///
/// Used where a partial failure must not abort the surrounding loop, such
/// as a time-boxed batch removal or restoring a dropped trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum BestEffort {
    Completed,
    Failed(String),
}

impl BestEffort {
    /// Tag `result`, logging a failure against `operation`.
    pub fn from_result<T>(operation: &str, result: DeviceResult<T>) -> Self {
        match result {
            Ok(_) => BestEffort::Completed,
            Err(e) => {
                warn!(%operation, error = %e, "best-effort operation failed, continuing");
                BestEffort::Failed(e.to_string())
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BestEffort::Completed)
    }
}
