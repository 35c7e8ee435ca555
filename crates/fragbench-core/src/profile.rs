//! Execution-profile dump aggregation.
//!
//! SQLite built with `VDBE_PROFILE` appends one row per executed opcode to
//! `vdbe_profile.out`:
//!
//! ```text
//! ---- begin
//!      1        1204        1204    0 Init           0   13    0
//!     20       48211        2410    1 OpenRead       0    2    0
//! ```
//!
//! Column 4 is the opcode name and column 1 the cycle count. Rows are reduced
//! by opcode into a sum. Dumps can grow very large, so input is consumed
//! line by line.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use tokio::io::AsyncBufReadExt;

use crate::error::{ParseError, ParseResult};
use crate::types::ProfileCounters;

const KEY_COLUMN: usize = 4;
const VALUE_COLUMN: usize = 1;

/// Streaming reduce-by-key over profile dump lines.
#[derive(Debug, Default)]
pub struct ProfileAggregator {
    counters: BTreeMap<String, u64>,
    line_no: usize,
}

impl ProfileAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one dump line into the counters.
    ///
    /// Comment lines (leading `-`) and lines without a key column are skipped.
    pub fn feed_line(&mut self, line: &str) -> ParseResult<()> {
        self.line_no += 1;
        if line.starts_with('-') {
            return Ok(());
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(key) = fields.get(KEY_COLUMN) else {
            return Ok(());
        };
        let raw = fields[VALUE_COLUMN];
        let value = raw.parse::<u64>().map_err(|_| ParseError::ProfileValue {
            line: self.line_no,
            value: raw.to_string(),
        })?;

        let slot = self.counters.entry((*key).to_string()).or_insert(0);
        *slot = slot.saturating_add(value);
        Ok(())
    }

    pub fn finish(self) -> ProfileCounters {
        ProfileCounters(self.counters)
    }
}

/// Aggregate a dump from any buffered reader.
pub fn aggregate_reader<R: BufRead>(reader: R) -> ParseResult<ProfileCounters> {
    let mut agg = ProfileAggregator::new();
    for line in reader.lines() {
        let line = line.map_err(|e| ParseError::ProfileIo(e.to_string()))?;
        agg.feed_line(&line)?;
    }
    Ok(agg.finish())
}

/// Aggregate a dump file without loading it into memory.
pub async fn aggregate_file(path: &Path) -> ParseResult<ProfileCounters> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ParseError::ProfileIo(format!("{}: {e}", path.display())))?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut agg = ProfileAggregator::new();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ParseError::ProfileIo(format!("{}: {e}", path.display())))?
    {
        agg.feed_line(&line)?;
    }
    let counters = agg.finish();
    tracing::debug!(path = %path.display(), keys = counters.len(), "profile dump aggregated");
    Ok(counters)
}
