//! Device metrics sampler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use fragbench_core::{ParseError, ParseResult, StorageUsage};
use fragbench_device::{DeviceHandle, DeviceResult, MediaDb};

/// Memory figures from `free`, in the units `free` prints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub shared: u64,
    pub buffers: u64,
}

/// One sample of everything exported on the metrics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMetrics {
    pub cpu_usage: f64,
    pub mem: MemoryUsage,
    pub disk: StorageUsage,
    pub disk_usage_percent: f64,
    pub pending_count: u64,
    pub externaldb_image_count: u64,
    pub external_db_size: u64,
    pub external_db_fragmentation: u64,
    pub fs_image_count: u64,
}

/// Runtime toggle for the metrics endpoint. Clones share the flag.
#[derive(Debug, Clone)]
pub struct MetricsSwitch {
    enabled: Arc<AtomicBool>,
}

impl Default for MetricsSwitch {
    fn default() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl MetricsSwitch {
    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "metrics toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Collects [`DeviceMetrics`] over a device handle.
#[derive(Debug, Clone)]
pub struct MetricsSampler {
    media: MediaDb,
}

impl MetricsSampler {
    pub fn new(media: MediaDb) -> Self {
        Self { media }
    }

    pub async fn sample(&self, device: &mut DeviceHandle) -> DeviceResult<DeviceMetrics> {
        let cpu_usage = parse_cpu_load(&device.shell("dumpsys cpuinfo").await?)?;
        let mem = parse_free(&device.shell("free").await?)?;
        let disk = device.storage_usage().await?;
        let disk_usage_percent = disk.percent()?;

        let metrics = DeviceMetrics {
            cpu_usage,
            mem,
            disk,
            disk_usage_percent,
            pending_count: self.media.pending_count(device).await?,
            externaldb_image_count: self.media.image_count(device).await?,
            external_db_size: self.media.db_size(device).await?,
            external_db_fragmentation: self.media.fragmentation_extents(device).await?,
            fs_image_count: self.media.fs_image_count(device).await?,
        };
        debug!(?metrics, "device metrics sampled");
        Ok(metrics)
    }
}

/// First figure of the `Load:` header of `dumpsys cpuinfo`.
pub fn parse_cpu_load(raw: &str) -> ParseResult<f64> {
    let numeric = || ParseError::Numeric {
        source_cmd: "dumpsys cpuinfo".to_string(),
        raw: raw.lines().next().unwrap_or_default().to_string(),
    };
    let first = raw.lines().find(|l| !l.trim().is_empty()).ok_or_else(numeric)?;
    first
        .split_whitespace()
        .nth(1)
        .and_then(|t| t.parse::<f64>().ok())
        .ok_or_else(numeric)
}

/// The `Mem:` row of `free`.
pub fn parse_free(raw: &str) -> ParseResult<MemoryUsage> {
    let numeric = || ParseError::Numeric {
        source_cmd: "free".to_string(),
        raw: raw.to_string(),
    };
    let row = raw
        .lines()
        .find(|l| l.trim_start().starts_with("Mem:"))
        .ok_or_else(numeric)?;
    let values: Vec<u64> = row
        .split_whitespace()
        .skip(1)
        .map(|t| t.parse::<u64>().map_err(|_| numeric()))
        .collect::<ParseResult<_>>()?;
    if values.len() < 5 {
        return Err(numeric());
    }
    Ok(MemoryUsage {
        total: values[0],
        used: values[1],
        free: values[2],
        shared: values[3],
        buffers: values[4],
    })
}
