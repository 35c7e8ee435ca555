use thiserror::Error;

use fragbench_device::DeviceError;

use crate::controller::Direction;

pub type OccupancyResult<T> = Result<T, OccupancyError>;

#[derive(Debug, Error)]
pub enum OccupancyError {
    /// Occupancy stopped moving towards the target.
    #[error(
        "{direction} to {target}% stalled: occupancy stayed at {last:.2}% for {repeats} consecutive batches"
    )]
    Stalled {
        direction: Direction,
        target: f64,
        last: f64,
        repeats: u32,
    },

    #[error("target occupancy must be within 0..=100, got {0}")]
    InvalidTarget(f64),

    #[error("convergence cancelled")]
    Cancelled,

    #[error(transparent)]
    Device(#[from] DeviceError),
}
