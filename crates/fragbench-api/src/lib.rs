//! fragbench-api: REST API for the benchmark service.
//!
//! Every JSON response uses the `{success, data?, error?}` envelope.
//! Handlers that measure start background jobs and answer `202`; while a
//! job or another request holds the device, device routes answer `409`.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Greeting |
//! | GET | `/works` | List runs |
//! | POST | `/works?percentageInterval&percentageTo` | Start a sweep |
//! | POST | `/works/cancel` | Cancel the running job |
//! | GET | `/works/{id}` | Full result tree of a run |
//! | GET | `/works/{id}/tasks` | Steps of a run |
//! | GET | `/works/{id}/queries` | Queries across all steps |
//! | GET | `/works/{id}/external-db-sizes` | Snapshot size per step |
//! | GET | `/works/{id}/android/time` | Device real time per step and query |
//! | GET | `/works/{id}/host/time` | Host real time per step and query |
//! | GET | `/works/{id}/queries/{query}/vdbe` | Profile counters per step |
//! | POST | `/works/{id}/tasks/{task}` | Measure one step |
//! | POST | `/works/{id}/tasks/{task}/export-db` | Re-export a step's snapshot |
//! | POST | `/works/{id}/redo-host-work` | Redo host replays |
//! | GET | `/jobs` | Running and last finished job |
//! | * | `/adb/...` | Device maintenance, see [`adb_handlers`] |

pub mod adb_handlers;
pub mod handlers;
pub mod jobs;
pub mod response;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use tokio::sync::RwLock;

use fragbench_core::BenchConfig;
use fragbench_device::{AdbClient, DeviceHandle, HostShell, MediaDb};
use fragbench_metrics::{MetricsSampler, MetricsSwitch};
use fragbench_occupancy::OccupancyController;
use fragbench_store::ResultStore;
use fragbench_sweep::SweepPipeline;

pub use jobs::{Busy, JobInfo, JobKind, JobOutcome, Jobs};
pub use response::ApiResponse;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<BenchConfig>,
    pub pipeline: SweepPipeline,
    pub controller: OccupancyController,
    pub media: MediaDb,
    pub sampler: MetricsSampler,
    pub metrics: MetricsSwitch,
    pub jobs: Jobs,
    /// `None` when the service runs without an adb binary.
    pub adb: Option<AdbClient>,
    pub selected: Arc<RwLock<Option<String>>>,
}

impl ApiState {
    pub fn new(
        config: BenchConfig,
        device: DeviceHandle,
        host: Arc<dyn HostShell>,
        adb: Option<AdbClient>,
    ) -> Self {
        let store = ResultStore::new(config.paths.workspace.clone());
        let media = MediaDb::new(&config.paths);
        let selected = device.id().map(str::to_string);
        Self {
            pipeline: SweepPipeline::new(&config, store, host),
            controller: OccupancyController::from_config(&config),
            sampler: MetricsSampler::new(media.clone()),
            media,
            metrics: MetricsSwitch::default(),
            jobs: Jobs::new(device),
            adb,
            selected: Arc::new(RwLock::new(selected)),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &ResultStore {
        self.pipeline.store()
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let adb_routes = Router::new()
        .route("/devices", get(adb_handlers::list_devices))
        .route("/devices/selected", get(adb_handlers::selected_device))
        .route("/devices/{id}/select", post(adb_handlers::select_device))
        .route("/device/connect-over-wifi", post(adb_handlers::connect_over_wifi))
        .route("/storage/percentage", get(adb_handlers::storage_percentage))
        .route("/storage/fill", post(adb_handlers::fill_storage))
        .route("/storage/drain", post(adb_handlers::drain_storage))
        .route("/storage/generate-batch", post(adb_handlers::generate_batch))
        .route("/metrics", get(adb_handlers::prometheus_metrics))
        .route("/metrics/on", patch(adb_handlers::metrics_on))
        .route("/metrics/off", patch(adb_handlers::metrics_off))
        .route("/external-db/pending-count", get(adb_handlers::pending_count))
        .route("/external-db/image-count", get(adb_handlers::image_count))
        .route("/external-db/fragmentation", get(adb_handlers::fragmentation))
        .route(
            "/external-db/trigger",
            post(adb_handlers::create_trigger).delete(adb_handlers::drop_trigger),
        )
        .route("/external-db/fragmentate", post(adb_handlers::fragmentate))
        .route("/fs/image-count", get(adb_handlers::fs_image_count))
        .route("/force-pending-to-0", post(adb_handlers::force_pending_to_zero))
        .route("/drop-cache", post(adb_handlers::drop_cache))
        .route("/broadcast-refresh", post(adb_handlers::broadcast_refresh))
        .route("/reboot", post(adb_handlers::reboot))
        .route("/push-query", put(adb_handlers::push_query));

    Router::new()
        .route("/", get(handlers::hello))
        .route("/works", get(handlers::list_works).post(handlers::start_sweep))
        .route("/works/cancel", post(handlers::cancel_job))
        .route("/works/{id}", get(handlers::get_work))
        .route("/works/{id}/tasks", get(handlers::list_tasks))
        .route("/works/{id}/queries", get(handlers::list_queries))
        .route("/works/{id}/external-db-sizes", get(handlers::snapshot_sizes))
        .route("/works/{id}/android/time", get(handlers::device_times))
        .route("/works/{id}/host/time", get(handlers::host_times))
        .route("/works/{id}/queries/{query}/vdbe", get(handlers::profile_series))
        .route("/works/{id}/tasks/{task}", post(handlers::run_task))
        .route("/works/{id}/tasks/{task}/export-db", post(handlers::export_db))
        .route("/works/{id}/redo-host-work", post(handlers::redo_host_work))
        .route("/jobs", get(handlers::job_status))
        .nest("/adb", adb_routes)
        .with_state(state)
}
