pub mod config;
pub mod error;
pub mod profile;
pub mod timing;
pub mod types;

pub use config::BenchConfig;
pub use error::{ParseError, ParseResult};
pub use profile::{ProfileAggregator, aggregate_file, aggregate_reader};
pub use timing::{parse_device_timing, parse_host_timing, parse_timing};
pub use types::*;
