//! Shared types used across fragbench crates.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

// ── Identifiers ────────────────────────────────────────────────────

/// Identifier of one complete sweep execution.
///
/// Derived from the local start time (`yyyyMMdd-HHmmss`). Because it doubles
/// as a directory name, only ASCII alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// Identifier for a run starting now.
    pub fn now() -> Self {
        Self(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string())
    }

    pub fn parse(s: &str) -> ParseResult<Self> {
        let valid = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseError::InvalidId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

/// One occupancy checkpoint within a run, as an integer percentage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StepPercent(pub u32);

impl fmt::Display for StepPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StepPercent {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(StepPercent)
            .map_err(|_| ParseError::InvalidId(s.to_string()))
    }
}

/// Name of a SQL script in the query set (e.g. `q1.sql`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryName(String);

/// Step column of the per-step result tables, which share one JSON object
/// with the query columns.
const RESERVED_COLUMN: &str = "task";

impl QueryName {
    pub fn parse(s: &str) -> ParseResult<Self> {
        let valid = !s.is_empty()
            && !matches!(s, "." | ".." | RESERVED_COLUMN)
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(ParseError::InvalidId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for QueryName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<QueryName> for String {
    fn from(q: QueryName) -> Self {
        q.0
    }
}

// ── Measurements ───────────────────────────────────────────────────

/// Where a query was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// On the remote device, against its live database.
    Device,
    /// On this machine, against the exported snapshot.
    Host,
}

impl Environment {
    /// File name of the persisted timing record for this environment.
    pub fn timing_file(self) -> &'static str {
        match self {
            Environment::Device => "android-time.json",
            Environment::Host => "host-time.json",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Device => f.write_str("device"),
            Environment::Host => f.write_str("host"),
        }
    }
}

/// Normalized output of a timing command, in seconds.
///
/// `io` is `real - user - system` and may be slightly negative when the
/// command's rounding noise exceeds the actual wait time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub real: f64,
    pub user: f64,
    pub system: f64,
    pub io: f64,
}

impl TimingRecord {
    pub fn new(real: f64, user: f64, system: f64) -> Self {
        Self {
            real,
            user,
            system,
            io: real - user - system,
        }
    }
}

/// Per-opcode counters reduced from one execution-profile dump.
///
/// Keys absent from the dump are absent from the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileCounters(pub BTreeMap<String, u64>);

impl ProfileCounters {
    pub fn get(&self, key: &str) -> Option<u64> {
        self.0.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A database file copied out of the device for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbSnapshot {
    pub path: PathBuf,
    pub size: u64,
}

/// Block usage of the device's target volume, as reported by `df`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUsage {
    pub used: u64,
    pub available: u64,
}

impl StorageUsage {
    /// Occupancy as `used / (used + available) * 100`.
    pub fn percent(&self) -> ParseResult<f64> {
        let total = self
            .used
            .checked_add(self.available)
            .ok_or_else(|| {
                ParseError::StorageUsage(format!("{} used + {} available", self.used, self.available))
            })?;
        if total == 0 {
            return Err(ParseError::EmptyVolume);
        }
        Ok(self.used as f64 * 100.0 / total as f64)
    }

    /// Parse the output of `df <volume>`.
    ///
    /// The last non-empty line holds the volume row:
    /// `<filesystem> <blocks> <used> <available> <use%> <mount>`.
    pub fn parse_df(raw: &str) -> ParseResult<Self> {
        let row = raw
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| ParseError::StorageUsage(raw.to_string()))?;
        let fields: Vec<&str> = row.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(ParseError::StorageUsage(raw.to_string()));
        }
        let used = fields[2]
            .parse::<u64>()
            .map_err(|_| ParseError::StorageUsage(raw.to_string()))?;
        let available = fields[3]
            .parse::<u64>()
            .map_err(|_| ParseError::StorageUsage(raw.to_string()))?;
        Ok(Self { used, available })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_rejects_path_components() {
        assert!(RunId::parse("20240101-120000").is_ok());
        assert!(RunId::parse("../etc").is_err());
        assert!(RunId::parse("a/b").is_err());
        assert!(RunId::parse("").is_err());
    }

    #[test]
    fn run_id_now_is_valid() {
        let id = RunId::now();
        assert_eq!(id.as_str().len(), "yyyyMMdd-HHmmss".len());
        assert!(RunId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn query_name_allows_sql_files_only_as_plain_names() {
        assert!(QueryName::parse("q1.sql").is_ok());
        assert!(QueryName::parse("..").is_err());
        assert!(QueryName::parse("dir/q1.sql").is_err());
    }

    #[test]
    fn query_name_cannot_shadow_step_column() {
        assert!(QueryName::parse("task").is_err());
        assert!(QueryName::parse("task.sql").is_ok());
    }

    #[test]
    fn query_name_deserialize_validates() {
        let ok: Result<QueryName, _> = serde_json::from_str("\"x1.sql\"");
        assert!(ok.is_ok());
        let bad: Result<QueryName, _> = serde_json::from_str("\"../x1.sql\"");
        assert!(bad.is_err());
    }

    #[test]
    fn timing_record_derives_io() {
        let t = TimingRecord::new(1.0, 0.25, 0.25);
        assert_eq!(t.io, 0.5);
    }

    #[test]
    fn timing_record_json_field_names() {
        let json = serde_json::to_value(TimingRecord::new(0.5, 0.25, 0.125)).unwrap();
        assert_eq!(json["real"], 0.5);
        assert_eq!(json["user"], 0.25);
        assert_eq!(json["system"], 0.125);
        assert_eq!(json["io"], 0.125);
    }

    #[test]
    fn profile_counters_serialize_flat() {
        let mut map = BTreeMap::new();
        map.insert("Column".to_string(), 7);
        let json = serde_json::to_string(&ProfileCounters(map)).unwrap();
        assert_eq!(json, r#"{"Column":7}"#);
    }

    #[test]
    fn parse_df_output() {
        let raw = "Filesystem     1K-blocks     Used Available Use% Mounted on\n\
                   /dev/fuse      115249236 57624618  57624618  50% /storage/emulated\n";
        let usage = StorageUsage::parse_df(raw).unwrap();
        assert_eq!(usage.used, 57624618);
        assert_eq!(usage.available, 57624618);
        assert_eq!(usage.percent().unwrap(), 50.0);
    }

    #[test]
    fn parse_df_garbage_is_error() {
        assert!(StorageUsage::parse_df("").is_err());
        assert!(StorageUsage::parse_df("df: /x: No such file").is_err());
    }

    #[test]
    fn zero_volume_is_error_not_nan() {
        let usage = StorageUsage { used: 0, available: 0 };
        assert_eq!(usage.percent(), Err(ParseError::EmptyVolume));
    }

    #[test]
    fn oversized_block_counts_are_error() {
        let usage = StorageUsage {
            used: u64::MAX,
            available: 1,
        };
        assert!(matches!(usage.percent(), Err(ParseError::StorageUsage(_))));
    }
}
