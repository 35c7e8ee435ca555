//! Materialized run trees and the aggregation rows built from them.

use std::collections::BTreeMap;

use serde::Serialize;

use fragbench_core::{
    DbSnapshot, Environment, ProfileCounters, QueryName, RunId, StepPercent, TimingRecord,
};

/// Everything stored for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTree {
    pub run: RunId,
    /// Ascending by step.
    pub steps: Vec<StepTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTree {
    pub step: StepPercent,
    pub snapshot: Option<DbSnapshot>,
    /// Sorted by query name.
    pub queries: Vec<QueryArtifacts>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryArtifacts {
    pub query: QueryName,
    pub device_time: Option<TimingRecord>,
    pub host_time: Option<TimingRecord>,
    pub profile: Option<ProfileCounters>,
}

impl QueryArtifacts {
    pub fn timing(&self, env: Environment) -> Option<&TimingRecord> {
        match env {
            Environment::Device => self.device_time.as_ref(),
            Environment::Host => self.host_time.as_ref(),
        }
    }
}

impl RunTree {
    /// Union of query names over all steps.
    pub fn queries(&self) -> Vec<QueryName> {
        let mut names: Vec<QueryName> = self
            .steps
            .iter()
            .flat_map(|s| s.queries.iter().map(|q| q.query.clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Real time per query at one step. Queries without a record are omitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingRow {
    #[serde(rename = "task")]
    pub step: StepPercent,
    #[serde(flatten)]
    pub real: BTreeMap<String, f64>,
}

/// Profile counters of one query at one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRow {
    #[serde(rename = "task")]
    pub step: StepPercent,
    #[serde(flatten)]
    pub counters: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSizeRow {
    #[serde(rename = "task")]
    pub step: StepPercent,
    pub size: u64,
}
