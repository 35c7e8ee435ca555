//! fragbench-sweep: benchmark sweep across occupancy levels.
//!
//! # Flow
//!
//! ```text
//! run_sweep(interval, target)
//!   push queries to the device
//!   for step in 10, 20, … (multiples of interval above current occupancy)
//!     fill until occupancy ≥ step            (fragbench-occupancy)
//!     run_step
//!       export external.db                   → <run>/<step>/external.db
//!       for query in catalog
//!         drop caches, replay on device      → android-time.json
//!         replay on host against snapshot    → host-time.json
//!         aggregate vdbe_profile.out         → vdbe-profile.json
//! ```
//!
//! Any failure aborts the step and the sweep. There are no retries: a
//! benchmark anomaly must be looked at before the run is repeated.
//!
//! # Components
//!
//! - **`plan`**: step boundaries and parameter validation
//! - **`catalog`**: the local query set
//! - **`executor`**: device and host query replays
//! - **`pipeline`**: sweep, single step, snapshot export, host redo

pub mod catalog;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod plan;

pub use catalog::QueryCatalog;
pub use error::{SweepError, SweepResult};
pub use executor::{DualExecutor, HostExecution};
pub use fragbench_occupancy::CancelSignal;
pub use pipeline::{RedoReport, StepReport, SweepPipeline, SweepReport};
pub use plan::{StepPlanner, plan_steps, validate_plan};
