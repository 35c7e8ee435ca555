//! Sweep pipeline: the sole writer of the result store.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use fragbench_core::{BenchConfig, DbSnapshot, Environment, QueryName, RunId, StepPercent};
use fragbench_device::{DeviceHandle, HostShell, MediaDb};
use fragbench_occupancy::{CancelSignal, OccupancyController};
use fragbench_store::ResultStore;

use crate::catalog::QueryCatalog;
use crate::error::{SweepError, SweepResult};
use crate::executor::DualExecutor;
use crate::plan::{StepPlanner, validate_plan};

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: StepPercent,
    /// Occupancy measured once the step was reached.
    pub occupancy: Option<f64>,
    pub snapshot: DbSnapshot,
    pub queries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub run: RunId,
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedoReport {
    pub run: RunId,
    pub steps: usize,
    pub executions: usize,
    /// Host artifacts deleted before re-execution.
    pub removed: usize,
}

/// Drives sweeps, single steps and host redos for one device.
#[derive(Clone)]
pub struct SweepPipeline {
    store: ResultStore,
    controller: OccupancyController,
    executor: DualExecutor,
    media: MediaDb,
    catalog: QueryCatalog,
}

impl SweepPipeline {
    pub fn new(config: &BenchConfig, store: ResultStore, host: Arc<dyn HostShell>) -> Self {
        Self {
            store,
            controller: OccupancyController::from_config(config),
            executor: DualExecutor::new(config, host),
            media: MediaDb::new(&config.paths),
            catalog: QueryCatalog::new(config.paths.local_query_dir()),
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    /// Replace the device's query directory with the local catalog.
    pub async fn push_queries(&self, device: &mut DeviceHandle) -> SweepResult<()> {
        self.media.push_queries(device, self.catalog.dir()).await?;
        Ok(())
    }

    /// Sweep under a fresh timestamped run id.
    pub async fn run_sweep(
        &self,
        device: &mut DeviceHandle,
        interval: u32,
        target: u32,
        cancel: &CancelSignal,
    ) -> SweepResult<SweepReport> {
        self.run_sweep_as(RunId::now(), device, interval, target, cancel)
            .await
    }

    /// Fill the device step by step up to `target`, running every catalog
    /// query at each step.
    ///
    /// Parameters are validated before the device is touched. Cancellation
    /// is honoured between steps, between queries and between fill batches.
    pub async fn run_sweep_as(
        &self,
        run: RunId,
        device: &mut DeviceHandle,
        interval: u32,
        target: u32,
        cancel: &CancelSignal,
    ) -> SweepResult<SweepReport> {
        validate_plan(interval, target)?;
        let queries = self.catalog.list().await?;
        let mut planner = StepPlanner::new(interval, target)?;

        let mut current = device.occupancy().await?;
        let Some(first) = planner.next_step(current) else {
            info!(run = %run, target, occupancy = current, "occupancy already at target, nothing to measure");
            return Ok(SweepReport { run, steps: Vec::new() });
        };

        info!(run = %run, interval, target, queries = queries.len(), "sweep started");
        self.push_queries(device).await?;
        self.store.create_run(&run).await?;

        let mut steps = Vec::new();
        let mut next = Some(first);
        while let Some(step) = next {
            if cancel.is_cancelled() {
                info!(run = %run, %step, "sweep cancelled");
                return Err(SweepError::Cancelled);
            }

            info!(run = %run, %step, occupancy = current, "filling to step");
            let report = self
                .controller
                .fill(device, f64::from(step.0), cancel)
                .await?;
            current = report.end;

            let mut step_report = self.run_step(device, &run, step, &queries, cancel).await?;
            step_report.occupancy = Some(current);
            steps.push(step_report);
            next = planner.next_step(current);
        }

        info!(run = %run, steps = steps.len(), "sweep finished");
        Ok(SweepReport { run, steps })
    }

    /// Export the snapshot for `step` and replay every query on both sides.
    ///
    /// The first failing query aborts the step.
    pub async fn run_step(
        &self,
        device: &mut DeviceHandle,
        run: &RunId,
        step: StepPercent,
        queries: &[QueryName],
        cancel: &CancelSignal,
    ) -> SweepResult<StepReport> {
        info!(run = %run, %step, queries = queries.len(), "step started");
        let snapshot = self.export_snapshot(device, run, step).await?;

        for query in queries {
            if cancel.is_cancelled() {
                info!(run = %run, %step, %query, "step cancelled");
                return Err(SweepError::Cancelled);
            }

            let device_time = self.executor.run_on_device(device, query).await?;
            self.store
                .write_timing(run, step, query, Environment::Device, &device_time)
                .await?;

            self.host_execution(run, step, query).await?;
            info!(run = %run, %step, %query, device_real = device_time.real, "query measured");
        }

        Ok(StepReport {
            step,
            occupancy: None,
            snapshot,
            queries: queries.len(),
        })
    }

    /// Copy the device's database into `<run>/<step>/external.db`,
    /// overwriting an earlier export.
    pub async fn export_snapshot(
        &self,
        device: &mut DeviceHandle,
        run: &RunId,
        step: StepPercent,
    ) -> SweepResult<DbSnapshot> {
        let path = self.store.snapshot_path(run, step);
        let size = self.media.export_db(device, &path).await?;
        self.store.invalidate(run).await;
        info!(run = %run, %step, size, "snapshot exported");
        Ok(DbSnapshot { path, size })
    }

    /// Delete every host artifact of `run`, then replay `queries` against
    /// each step's snapshot. Device data and snapshots are left alone.
    pub async fn redo_host_executions(
        &self,
        run: &RunId,
        queries: &[QueryName],
        cancel: &CancelSignal,
    ) -> SweepResult<RedoReport> {
        let steps = self.store.list_steps(run).await?;
        let mut stored = self.store.list_queries(run).await?;
        stored.extend(queries.iter().cloned());
        stored.sort();
        stored.dedup();

        let mut removed = 0;
        for &step in &steps {
            for query in &stored {
                removed += self.store.clear_host_artifacts(run, step, query).await?;
            }
        }
        info!(run = %run, steps = steps.len(), removed, "host artifacts cleared");

        let mut executions = 0;
        for &step in &steps {
            for query in queries {
                if cancel.is_cancelled() {
                    info!(run = %run, %step, %query, "redo cancelled");
                    return Err(SweepError::Cancelled);
                }
                self.host_execution(run, step, query).await?;
                executions += 1;
            }
        }

        info!(run = %run, executions, "host redo finished");
        Ok(RedoReport {
            run: run.clone(),
            steps: steps.len(),
            executions,
            removed,
        })
    }

    async fn host_execution(
        &self,
        run: &RunId,
        step: StepPercent,
        query: &QueryName,
    ) -> SweepResult<()> {
        let query_dir = self.store.ensure_query_dir(run, step, query).await?;
        let result = self
            .executor
            .run_on_host(
                &query_dir,
                &self.catalog.path_of(query),
                &self.store.snapshot_path(run, step),
            )
            .await?;

        self.store
            .write_timing(run, step, query, Environment::Host, &result.timing)
            .await?;
        if let Some(profile) = &result.profile {
            self.store.write_profile(run, step, query, profile).await?;
        }
        Ok(())
    }
}
