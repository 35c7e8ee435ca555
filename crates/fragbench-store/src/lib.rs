//! fragbench-store: on-disk result store for benchmark runs.
//!
//! # Layout
//!
//! ```text
//! workspace/
//! └── <run-id>/                     e.g. 20240521-134502
//!     └── <step>/                   occupancy percent, e.g. 30
//!         ├── external.db           snapshot exported at this step
//!         └── <query>/              e.g. q1.sql
//!             ├── android-time.json
//!             ├── host-time.json
//!             ├── vdbe-profile.json
//!             └── vdbe_profile.out  raw dump left by the host engine
//! ```
//!
//! Reads of missing artifacts return `Ok(None)`. Reads go through a
//! [`RunCache`] holding the materialized tree of each run; every write made
//! through [`ResultStore`] drops the cached entry for that run.
//!
//! `ResultStore` is `Clone` + `Send` + `Sync` (state behind `Arc`) and can
//! be shared across async tasks.

pub mod cache;
pub mod error;
pub mod store;
pub mod types;

pub use cache::RunCache;
pub use error::{StoreError, StoreResult};
pub use store::{PROFILE_DUMP_FILE, PROFILE_FILE, ResultStore, SNAPSHOT_FILE};
pub use types::*;
