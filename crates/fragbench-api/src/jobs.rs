//! Background jobs and exclusive device access.
//!
//! The device and its single SQLite instance take one command at a time.
//! Every handler that touches the device first claims the shared
//! `Mutex<DeviceHandle>` with `try_lock`; long-running operations move the
//! guard into a spawned task, so the device stays claimed until the job
//! ends and concurrent requests get `409 Conflict` instead of queueing.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use fragbench_core::RunId;
use fragbench_device::DeviceHandle;
use fragbench_occupancy::CancelSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Sweep,
    Step,
    RedoHost,
    Fill,
    Drain,
    Fragmentate,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: u64,
    pub kind: JobKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunId>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    #[serde(flatten)]
    pub info: JobInfo,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The device is claimed by another request or job.
#[derive(Debug, Clone, Copy)]
pub struct Busy;

struct Running {
    info: JobInfo,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
struct Slots {
    current: Option<Running>,
    last: Option<JobOutcome>,
}

/// Owner of the device mutex and the single background job slot.
#[derive(Clone)]
pub struct Jobs {
    device: Arc<Mutex<DeviceHandle>>,
    slots: Arc<RwLock<Slots>>,
    next_id: Arc<AtomicU64>,
}

impl Jobs {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            slots: Arc::new(RwLock::new(Slots::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Claim the device for a short request.
    pub fn try_device(&self) -> Result<OwnedMutexGuard<DeviceHandle>, Busy> {
        self.device.clone().try_lock_owned().map_err(|_| Busy)
    }

    /// Wait for the device, e.g. from the CLI where nothing else competes.
    pub async fn device(&self) -> OwnedMutexGuard<DeviceHandle> {
        self.device.clone().lock_owned().await
    }

    pub async fn current(&self) -> Option<JobInfo> {
        self.slots.read().await.current.as_ref().map(|r| r.info.clone())
    }

    pub async fn last(&self) -> Option<JobOutcome> {
        self.slots.read().await.last.clone()
    }

    /// Raise the cancel signal of the running job. Returns the job that was
    /// asked to stop, if any.
    pub async fn cancel(&self) -> Option<JobInfo> {
        let slots = self.slots.read().await;
        let running = slots.current.as_ref()?;
        // The receiver lives inside the job; a send error means it already ended.
        let _ = running.cancel.send(true);
        info!(job = running.info.id, kind = ?running.info.kind, "job cancellation requested");
        Some(running.info.clone())
    }

    /// Claim the device and run `job` in the background.
    ///
    /// The guard is handed to the job and released when its future
    /// completes. The outcome is kept for [`Jobs::last`].
    pub async fn spawn<F, Fut, T, E>(
        &self,
        kind: JobKind,
        run: Option<RunId>,
        job: F,
    ) -> Result<(JobInfo, JoinHandle<()>), Busy>
    where
        F: FnOnce(OwnedMutexGuard<DeviceHandle>, CancelSignal) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
    {
        let guard = self.try_device()?;
        let (cancel_tx, cancel) = CancelSignal::channel();
        let info = JobInfo {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            run,
            started_at: Utc::now(),
        };

        {
            let mut slots = self.slots.write().await;
            slots.current = Some(Running {
                info: info.clone(),
                cancel: cancel_tx,
            });
        }
        info!(job = info.id, ?kind, run = ?info.run, "job started");

        let jobs = self.clone();
        let started = info.clone();
        let handle = tokio::spawn(async move {
            let result = job(guard, cancel).await;
            jobs.finish(started, result).await;
        });
        Ok((info, handle))
    }

    async fn finish<T: Serialize, E: Display>(&self, info: JobInfo, result: Result<T, E>) {
        let (report, error) = match result {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(value) => {
                    info!(job = info.id, kind = ?info.kind, "job finished");
                    (Some(value), None)
                }
                Err(e) => {
                    warn!(job = info.id, kind = ?info.kind, error = %e, "job finished but its report could not be encoded");
                    (None, Some(format!("report encoding failed: {e}")))
                }
            },
            Err(e) => {
                error!(job = info.id, kind = ?info.kind, error = %e, "job failed");
                (None, Some(e.to_string()))
            }
        };

        let mut slots = self.slots.write().await;
        // A later job may already occupy the slot once our guard dropped.
        if slots.current.as_ref().is_some_and(|r| r.info.id == info.id) {
            slots.current = None;
        }
        slots.last = Some(JobOutcome {
            info,
            finished_at: Utc::now(),
            report,
            error,
        });
    }
}
