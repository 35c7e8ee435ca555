//! Error types for device and host command execution.

use thiserror::Error;

use fragbench_core::ParseError;

/// Result type alias for device and host operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while talking to the device or running host commands.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device is connected, or the connection was lost.
    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    #[error("command failed (exit code {code}): {command}\n{output}")]
    Command {
        command: String,
        code: i32,
        output: String,
    },

    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
