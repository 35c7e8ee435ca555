//! fragbench-metrics: observability for the device under test.
//!
//! # Architecture
//!
//! ```text
//! MetricsSampler
//!   ├── sample() ← dumpsys cpuinfo, free, df, media db counts,
//!   │              f2fs extents, DCIM batch image count
//!   └── MetricsSwitch ← runtime on/off toggle
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /adb/metrics
//! ```

pub mod prometheus;
pub mod sampler;

pub use prometheus::render_prometheus;
pub use sampler::{DeviceMetrics, MemoryUsage, MetricsSampler, MetricsSwitch, parse_cpu_load, parse_free};
