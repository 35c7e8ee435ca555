//! Error types for the result store.

use thiserror::Error;

/// Result type alias for result store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing run artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("io error at {path}: {reason}")]
    Io { path: String, reason: String },

    /// An artifact exists but does not hold what it should.
    #[error("corrupt artifact {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(String),
}
