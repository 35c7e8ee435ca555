//! One-shot commands. Each connects to the device, runs to completion and
//! prints its report as JSON on stdout.
//!
//! Ctrl-C raises the cancel signal; the running job stops at the next
//! batch, query or step boundary instead of mid-command.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use fragbench_core::{BenchConfig, RunId, StepPercent};
use fragbench_device::{AdbClient, BashShell, DeviceHandle, MediaDb};
use fragbench_metrics::{MetricsSampler, render_prometheus};
use fragbench_occupancy::{CancelSignal, OccupancyController};
use fragbench_store::ResultStore;
use fragbench_sweep::SweepPipeline;

/// Connect to the configured device, or the first one adb lists.
pub async fn connect_device(config: &BenchConfig) -> anyhow::Result<(DeviceHandle, AdbClient)> {
    let adb = AdbClient::from_config(&config.device);
    let device = adb
        .connect(config.device.serial.as_deref(), config.device.root)
        .await
        .context("connecting to device")?;
    info!(serial = %device.serial(), "device connected");
    let handle = DeviceHandle::new(Box::new(device), config.paths.remote_volume.clone());
    Ok((handle, adb))
}

fn pipeline(config: &BenchConfig) -> SweepPipeline {
    let store = ResultStore::new(config.paths.workspace.clone());
    let host = Arc::new(BashShell::from_config(&config.host));
    SweepPipeline::new(config, store, host)
}

fn cancel_on_ctrl_c() -> CancelSignal {
    let (tx, signal) = CancelSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping at the next boundary");
            let _ = tx.send(true);
        }
    });
    signal
}

fn print_report<T: serde::Serialize>(report: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

pub async fn sweep(config: BenchConfig, interval: u32, target: u32) -> anyhow::Result<()> {
    fragbench_sweep::validate_plan(interval, target)?;
    let (mut device, _) = connect_device(&config).await?;
    let report = pipeline(&config)
        .run_sweep(&mut device, interval, target, &cancel_on_ctrl_c())
        .await?;
    print_report(&report)
}

pub async fn step(config: BenchConfig, run: &str, step: u32, queries: &[String]) -> anyhow::Result<()> {
    let run = RunId::parse(run)?;
    let pipeline = pipeline(&config);
    let queries = pipeline.catalog().select(queries).await?;
    let (mut device, _) = connect_device(&config).await?;

    pipeline.push_queries(&mut device).await?;
    let report = pipeline
        .run_step(&mut device, &run, StepPercent(step), &queries, &cancel_on_ctrl_c())
        .await?;
    print_report(&report)
}

pub async fn redo_host(config: BenchConfig, run: &str, queries: &[String]) -> anyhow::Result<()> {
    let run = RunId::parse(run)?;
    let pipeline = pipeline(&config);
    let queries = pipeline.catalog().select(queries).await?;
    let report = pipeline
        .redo_host_executions(&run, &queries, &cancel_on_ctrl_c())
        .await?;
    print_report(&report)
}

pub async fn fill(config: BenchConfig, target: f64) -> anyhow::Result<()> {
    let (mut device, _) = connect_device(&config).await?;
    let report = OccupancyController::from_config(&config)
        .fill(&mut device, target, &cancel_on_ctrl_c())
        .await?;
    print_report(&report)
}

pub async fn drain(config: BenchConfig, target: f64) -> anyhow::Result<()> {
    let (mut device, _) = connect_device(&config).await?;
    let report = OccupancyController::from_config(&config)
        .drain(&mut device, target, &cancel_on_ctrl_c())
        .await?;
    print_report(&report)
}

pub async fn metrics(config: BenchConfig) -> anyhow::Result<()> {
    let (mut device, _) = connect_device(&config).await?;
    let sampler = MetricsSampler::new(MediaDb::new(&config.paths));
    let sample = sampler.sample(&mut device).await?;
    print!("{}", render_prometheus(&sample));
    Ok(())
}
