//! Parse errors for raw command output and identifiers.

use thiserror::Error;

/// Result type alias for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Raised when text produced by a timing command, a profile dump, or a
/// device utility does not match the expected layout.
///
/// Kept distinct from "file absent" so that a malformed artifact is never
/// coerced into a zero measurement.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("malformed device timing output: {0:?}")]
    DeviceTiming(String),

    #[error("malformed host timing output: {0:?}")]
    HostTiming(String),

    #[error("malformed duration token: {0:?}")]
    Duration(String),

    #[error("profile dump line {line}: invalid value {value:?}")]
    ProfileValue { line: usize, value: String },

    #[error("profile dump read failed: {0}")]
    ProfileIo(String),

    #[error("malformed storage usage output: {0:?}")]
    StorageUsage(String),

    #[error("volume reports zero used and zero available blocks")]
    EmptyVolume,

    #[error("malformed numeric output from {source_cmd}: {raw:?}")]
    Numeric { source_cmd: String, raw: String },

    #[error("invalid identifier {0:?}")]
    InvalidId(String),
}
