use thiserror::Error;

use fragbench_core::ParseError;
use fragbench_device::DeviceError;
use fragbench_occupancy::OccupancyError;
use fragbench_store::StoreError;

pub type SweepResult<T> = Result<T, SweepError>;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid sweep: {0}")]
    InvalidPlan(String),

    #[error("sweep cancelled")]
    Cancelled,

    /// The host engine left no profile dump behind.
    #[error("no profile dump at {0}")]
    MissingProfile(String),

    /// A requested query has no file in the local catalog.
    #[error("unknown query {0}")]
    UnknownQuery(String),

    #[error("query catalog {path}: {reason}")]
    Catalog { path: String, reason: String },

    #[error(transparent)]
    Occupancy(OccupancyError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OccupancyError> for SweepError {
    fn from(e: OccupancyError) -> Self {
        match e {
            OccupancyError::Cancelled => SweepError::Cancelled,
            other => SweepError::Occupancy(other),
        }
    }
}
