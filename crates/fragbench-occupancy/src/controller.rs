//! Occupancy convergence controller.
//!
//! Fill duplicates the staged `DCIM/batch` directory into freshly
//! timestamped `DCIM/batch-<yyyyMMdd-HHmmss>` directories. Drain removes
//! those duplicates under a time budget and tolerates a partial removal.

use std::fmt;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fragbench_core::BenchConfig;
use fragbench_core::config::OccupancyConfig;
use fragbench_device::{BestEffort, DeviceHandle};

use crate::cancel::CancelSignal;
use crate::error::{OccupancyError, OccupancyResult};
use crate::stall::StallTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Fill,
    Drain,
}

impl Direction {
    /// Whether another batch is needed to move `current` to `target`.
    pub fn needs_batch(self, current: f64, target: f64) -> bool {
        match self {
            Direction::Fill => target - current > 0.0,
            Direction::Drain => current - target > 0.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Fill => write!(f, "fill"),
            Direction::Drain => write!(f, "drain"),
        }
    }
}

/// Outcome of one convergence.
#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceReport {
    pub direction: Direction,
    pub target: f64,
    pub start: f64,
    pub end: f64,
    pub batches: u32,
    /// Drain batches whose removal failed or timed out.
    pub failed_removals: u32,
}

/// Drives the occupancy of the handle's volume to a target percentage.
#[derive(Debug, Clone)]
pub struct OccupancyController {
    dcim: String,
    config: OccupancyConfig,
}

impl OccupancyController {
    pub fn new(dcim: impl Into<String>, config: OccupancyConfig) -> Self {
        Self {
            dcim: dcim.into(),
            config,
        }
    }

    pub fn from_config(config: &BenchConfig) -> Self {
        Self::new(config.paths.remote_dcim.clone(), config.occupancy.clone())
    }

    pub async fn fill(
        &self,
        device: &mut DeviceHandle,
        target: f64,
        cancel: &CancelSignal,
    ) -> OccupancyResult<ConvergenceReport> {
        self.converge_to(device, Direction::Fill, target, cancel).await
    }

    pub async fn drain(
        &self,
        device: &mut DeviceHandle,
        target: f64,
        cancel: &CancelSignal,
    ) -> OccupancyResult<ConvergenceReport> {
        self.converge_to(device, Direction::Drain, target, cancel).await
    }

    /// Apply batches until occupancy crosses `target` in `direction`.
    ///
    /// Fails with [`OccupancyError::Stalled`] once `stall_threshold`
    /// consecutive batches leave the reading unchanged.
    pub async fn converge_to(
        &self,
        device: &mut DeviceHandle,
        direction: Direction,
        target: f64,
        cancel: &CancelSignal,
    ) -> OccupancyResult<ConvergenceReport> {
        if !target.is_finite() || !(0.0..=100.0).contains(&target) {
            return Err(OccupancyError::InvalidTarget(target));
        }

        let start = device.occupancy().await?;
        info!(%direction, target, start, "converging occupancy");

        let mut current = start;
        let mut tracker = StallTracker::new(self.config.stall_threshold, start);
        let mut batches = 0;
        let mut failed_removals = 0;

        while direction.needs_batch(current, target) {
            if cancel.is_cancelled() {
                info!(%direction, target, current, batches, "convergence cancelled");
                return Err(OccupancyError::Cancelled);
            }

            match direction {
                Direction::Fill => self.fill_batch(device).await?,
                Direction::Drain => {
                    if !self.drain_batch(device).await.is_completed() {
                        failed_removals += 1;
                    }
                }
            }
            batches += 1;

            current = device.occupancy().await?;
            debug!(%direction, target, occupancy = current, batches, "batch applied");

            if tracker.observe(current) {
                return Err(OccupancyError::Stalled {
                    direction,
                    target,
                    last: current,
                    repeats: tracker.repeats(),
                });
            }
        }

        info!(%direction, target, start, end = current, batches, "occupancy converged");
        Ok(ConvergenceReport {
            direction,
            target,
            start,
            end: current,
            batches,
            failed_removals,
        })
    }

    /// Make `fill_copies_per_batch` timestamped copies of the staged batch.
    ///
    /// Each copy sleeps a second after creating its directory so the next
    /// timestamp is distinct.
    pub async fn fill_batch(&self, device: &mut DeviceHandle) -> OccupancyResult<()> {
        for _ in 0..self.config.fill_copies_per_batch {
            let copy = format!(
                "{}/batch-{}",
                self.dcim,
                Local::now().format("%Y%m%d-%H%M%S")
            );
            let command = format!(
                "mkdir -p {copy} && sleep 1 && cp -r {}/batch/. {copy}",
                self.dcim
            );
            device.shell(&command).await?;
        }
        Ok(())
    }

    /// Remove batch copies within `drain_timeout_secs`.
    pub async fn drain_batch(&self, device: &mut DeviceHandle) -> BestEffort {
        let command = format!(
            "timeout {} rm -rf {}/batch-*",
            self.config.drain_timeout_secs, self.dcim
        );
        BestEffort::from_result("remove batch copies", device.shell(&command).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragbench_device::mock::SimDevice;

    fn controller() -> OccupancyController {
        OccupancyController::new("/sdcard/DCIM", OccupancyConfig::default())
    }

    fn handle(sim: &SimDevice) -> DeviceHandle {
        DeviceHandle::new(Box::new(sim.clone()), "/storage/emulated/0")
    }

    #[tokio::test]
    async fn monotonic_fill_stops_when_target_crossed() {
        let sim = SimDevice::new();
        sim.script_occupancy([10.0, 12.0, 14.0, 16.0, 18.0, 20.0, 22.0, 24.0]);
        let mut device = handle(&sim);

        let report = controller()
            .fill(&mut device, 20.0, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.start, 10.0);
        assert_eq!(report.end, 20.0);
        assert_eq!(report.batches, 5);
    }

    #[tokio::test]
    async fn lowest_stall_threshold_tolerates_rising_fill() {
        let config = OccupancyConfig {
            stall_threshold: std::num::NonZeroU32::MIN,
            ..OccupancyConfig::default()
        };
        let sim = SimDevice::new();
        sim.script_occupancy([10.0, 12.0, 14.0, 20.0]);
        let mut device = handle(&sim);

        let report = OccupancyController::new("/sdcard/DCIM", config)
            .fill(&mut device, 20.0, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.end, 20.0);
        assert_eq!(report.batches, 3);
    }

    #[tokio::test]
    async fn constant_readings_stall_on_tenth_repeat() {
        let sim = SimDevice::new();
        sim.script_occupancy([30.0]);
        let mut device = handle(&sim);

        let err = controller()
            .fill(&mut device, 50.0, &CancelSignal::never())
            .await
            .unwrap_err();
        match err {
            OccupancyError::Stalled {
                direction,
                repeats,
                last,
                ..
            } => {
                assert_eq!(direction, Direction::Fill);
                assert_eq!(repeats, 10);
                assert_eq!(last, 30.0);
            }
            other => panic!("unexpected error: {other}"),
        }

        let df_reads = sim.commands().iter().filter(|c| c.starts_with("df ")).count();
        assert_eq!(df_reads, 11);
    }

    #[tokio::test]
    async fn progress_resets_stall_count() {
        let sim = SimDevice::new();
        let mut readings = vec![10.0; 10];
        readings.extend([11.0; 9]);
        readings.push(60.0);
        sim.script_occupancy(readings);
        let mut device = handle(&sim);

        let report = controller()
            .fill(&mut device, 50.0, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.end, 60.0);
        assert_eq!(report.batches, 19);
    }

    #[tokio::test]
    async fn fill_against_simulated_volume() {
        let sim = SimDevice::new()
            .with_storage(0, 10_000)
            .with_fill_per_batch(100);
        let mut device = handle(&sim);

        let report = controller()
            .fill(&mut device, 3.0, &CancelSignal::never())
            .await
            .unwrap();
        // Each fill batch makes ten copies of 100 blocks.
        assert_eq!(report.batches, 1);
        assert_eq!(report.end, 10.0);

        let copies: Vec<_> = sim
            .commands()
            .into_iter()
            .filter(|c| c.contains("cp -r /sdcard/DCIM/batch/. /sdcard/DCIM/batch-"))
            .collect();
        assert_eq!(copies.len(), 10);
        assert!(copies[0].starts_with("mkdir -p /sdcard/DCIM/batch-"));
    }

    #[tokio::test]
    async fn already_at_target_applies_no_batch() {
        let sim = SimDevice::new().with_storage(5_000, 10_000);
        let mut device = handle(&sim);
        let report = controller()
            .fill(&mut device, 50.0, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.batches, 0);
    }

    #[tokio::test]
    async fn drain_tolerates_failed_removals() {
        let sim = SimDevice::new();
        sim.fail_drains("timeout");
        sim.script_occupancy([60.0, 58.0, 55.0, 49.0]);
        let mut device = handle(&sim);

        let report = controller()
            .drain(&mut device, 50.0, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.failed_removals, 3);
        assert!(
            sim.commands()
                .iter()
                .any(|c| c == "timeout 3 rm -rf /sdcard/DCIM/batch-*")
        );
    }

    #[tokio::test]
    async fn drain_against_simulated_volume() {
        let sim = SimDevice::new()
            .with_storage(6_000, 10_000)
            .with_drain_per_batch(500);
        let mut device = handle(&sim);
        let report = controller()
            .drain(&mut device, 42.0, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.batches, 4);
        assert_eq!(report.end, 40.0);
        assert_eq!(sim.used(), 4_000);
    }

    #[tokio::test]
    async fn cancelled_before_first_batch() {
        let sim = SimDevice::new().with_storage(0, 10_000).with_fill_per_batch(10);
        let mut device = handle(&sim);
        let (tx, cancel) = CancelSignal::channel();
        tx.send(true).unwrap();

        let err = controller().fill(&mut device, 50.0, &cancel).await.unwrap_err();
        assert!(matches!(err, OccupancyError::Cancelled));
        assert_eq!(sim.used(), 0);
    }

    #[tokio::test]
    async fn out_of_range_target_rejected() {
        let sim = SimDevice::new();
        let mut device = handle(&sim);
        let err = controller()
            .fill(&mut device, 120.0, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, OccupancyError::InvalidTarget(_)));
        assert!(sim.commands().is_empty());
    }

    #[tokio::test]
    async fn detached_device_is_fatal() {
        let mut device = DeviceHandle::detached("no device", "/storage/emulated/0");
        let err = controller()
            .fill(&mut device, 50.0, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, OccupancyError::Device(_)));
    }
}
