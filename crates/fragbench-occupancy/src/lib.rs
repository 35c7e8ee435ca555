//! fragbench-occupancy: drive device storage occupancy to a target.
//!
//! # Convergence loop
//!
//! ```text
//! current = occupancy(volume)            // used / (used + available) * 100
//! while direction.needs_batch(current, target):
//!     cancel?                            // checked before every batch
//!     fill:  N timestamped copies of DCIM/batch
//!     drain: timeout <secs> rm -rf DCIM/batch-*   (failure logged, tolerated)
//!     next = occupancy(volume)
//!     next == current ? repeats += 1 : repeats = 0
//!     repeats >= threshold → Stalled
//!     current = next
//! ```
//!
//! There is no bound on the number of batches. The loop ends when the target
//! is crossed or when the stall guard trips.

pub mod cancel;
pub mod controller;
pub mod error;
pub mod stall;

pub use cancel::CancelSignal;
pub use controller::{ConvergenceReport, Direction, OccupancyController};
pub use error::{OccupancyError, OccupancyResult};
pub use stall::StallTracker;
