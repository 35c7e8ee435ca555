//! ResultStore: filesystem persistence for benchmark runs.
//!
//! The sweep pipeline is the only writer. Aggregation endpoints read back
//! through the run cache.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use fragbench_core::{
    DbSnapshot, Environment, ProfileCounters, QueryName, RunId, StepPercent, TimingRecord,
};

use crate::cache::RunCache;
use crate::error::{StoreError, StoreResult};
use crate::types::*;

pub const SNAPSHOT_FILE: &str = "external.db";
pub const PROFILE_FILE: &str = "vdbe-profile.json";
pub const PROFILE_DUMP_FILE: &str = "vdbe_profile.out";

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Closure factory mapping an `io::Error` at `path` into `StoreError::Io`.
macro_rules! io_err {
    ($path:expr) => {
        |e: std::io::Error| io_error(&$path, e)
    };
}

struct Inner {
    root: PathBuf,
    cache: RunCache,
}

/// Thread-safe handle to the result workspace.
#[derive(Clone)]
pub struct ResultStore {
    inner: Arc<Inner>,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                cache: RunCache::new(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn cache(&self) -> &RunCache {
        &self.inner.cache
    }

    // ── Layout ─────────────────────────────────────────────────────

    pub fn run_dir(&self, run: &RunId) -> PathBuf {
        self.inner.root.join(run.as_str())
    }

    pub fn step_dir(&self, run: &RunId, step: StepPercent) -> PathBuf {
        self.run_dir(run).join(step.to_string())
    }

    pub fn snapshot_path(&self, run: &RunId, step: StepPercent) -> PathBuf {
        self.step_dir(run, step).join(SNAPSHOT_FILE)
    }

    pub fn query_dir(&self, run: &RunId, step: StepPercent, query: &QueryName) -> PathBuf {
        self.step_dir(run, step).join(query.as_str())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Run ids found in the workspace, ascending. A missing workspace has
    /// no runs.
    pub async fn list_runs(&self) -> StoreResult<Vec<RunId>> {
        let root = &self.inner.root;
        let names = match list_dirs(root).await {
            Ok(names) => names,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(root, e)),
        };
        let mut runs: Vec<RunId> = names
            .iter()
            .filter_map(|n| RunId::parse(n).ok())
            .collect();
        runs.sort();
        Ok(runs)
    }

    /// The full tree of `run`, built on first access and cached.
    pub async fn get_run(&self, run: &RunId) -> StoreResult<Arc<RunTree>> {
        if let Some(tree) = self.inner.cache.get(run).await {
            return Ok(tree);
        }
        let tree = Arc::new(self.build_tree(run).await?);
        self.inner.cache.insert(Arc::clone(&tree)).await;
        debug!(run = %run, steps = tree.steps.len(), "run tree cached");
        Ok(tree)
    }

    pub async fn list_steps(&self, run: &RunId) -> StoreResult<Vec<StepPercent>> {
        Ok(self.get_run(run).await?.steps.iter().map(|s| s.step).collect())
    }

    /// Union of query directories across all steps of `run`.
    pub async fn list_queries(&self, run: &RunId) -> StoreResult<Vec<QueryName>> {
        Ok(self.get_run(run).await?.queries())
    }

    pub async fn read_timing(
        &self,
        run: &RunId,
        step: StepPercent,
        query: &QueryName,
        env: Environment,
    ) -> StoreResult<Option<TimingRecord>> {
        read_json(&self.query_dir(run, step, query).join(env.timing_file())).await
    }

    pub async fn read_profile(
        &self,
        run: &RunId,
        step: StepPercent,
        query: &QueryName,
    ) -> StoreResult<Option<ProfileCounters>> {
        read_json(&self.query_dir(run, step, query).join(PROFILE_FILE)).await
    }

    pub async fn snapshot_size(&self, run: &RunId, step: StepPercent) -> StoreResult<Option<u64>> {
        let path = self.snapshot_path(run, step);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    // ── Aggregations ───────────────────────────────────────────────

    /// One row per step mapping each query to its real time in `env`.
    pub async fn timing_table(&self, run: &RunId, env: Environment) -> StoreResult<Vec<TimingRow>> {
        let tree = self.get_run(run).await?;
        Ok(tree
            .steps
            .iter()
            .map(|step| TimingRow {
                step: step.step,
                real: step
                    .queries
                    .iter()
                    .filter_map(|q| q.timing(env).map(|t| (q.query.to_string(), t.real)))
                    .collect(),
            })
            .collect())
    }

    /// Profile counters of `query` at every step that has them.
    pub async fn profile_series(&self, run: &RunId, query: &QueryName) -> StoreResult<Vec<ProfileRow>> {
        let tree = self.get_run(run).await?;
        Ok(tree
            .steps
            .iter()
            .filter_map(|step| {
                let artifacts = step.queries.iter().find(|q| &q.query == query)?;
                let profile = artifacts.profile.as_ref()?;
                Some(ProfileRow {
                    step: step.step,
                    counters: profile.0.clone(),
                })
            })
            .collect())
    }

    pub async fn snapshot_sizes(&self, run: &RunId) -> StoreResult<Vec<SnapshotSizeRow>> {
        let tree = self.get_run(run).await?;
        Ok(tree
            .steps
            .iter()
            .filter_map(|step| {
                step.snapshot.as_ref().map(|s| SnapshotSizeRow {
                    step: step.step,
                    size: s.size,
                })
            })
            .collect())
    }

    // ── Writes ─────────────────────────────────────────────────────

    pub async fn create_run(&self, run: &RunId) -> StoreResult<PathBuf> {
        let dir = self.run_dir(run);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err!(dir))?;
        self.invalidate(run).await;
        debug!(run = %run, "run created");
        Ok(dir)
    }

    /// Create the directory of one query at one step.
    pub async fn ensure_query_dir(
        &self,
        run: &RunId,
        step: StepPercent,
        query: &QueryName,
    ) -> StoreResult<PathBuf> {
        let dir = self.query_dir(run, step, query);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err!(dir))?;
        self.invalidate(run).await;
        Ok(dir)
    }

    pub async fn write_timing(
        &self,
        run: &RunId,
        step: StepPercent,
        query: &QueryName,
        env: Environment,
        record: &TimingRecord,
    ) -> StoreResult<PathBuf> {
        let path = self.query_dir(run, step, query).join(env.timing_file());
        write_json(&path, record).await?;
        self.invalidate(run).await;
        debug!(run = %run, %step, %query, %env, real = record.real, "timing stored");
        Ok(path)
    }

    pub async fn write_profile(
        &self,
        run: &RunId,
        step: StepPercent,
        query: &QueryName,
        counters: &ProfileCounters,
    ) -> StoreResult<PathBuf> {
        let path = self.query_dir(run, step, query).join(PROFILE_FILE);
        write_json(&path, counters).await?;
        self.invalidate(run).await;
        debug!(run = %run, %step, %query, keys = counters.len(), "profile stored");
        Ok(path)
    }

    /// Delete host timing, profile and raw dump of one query at one step.
    /// Returns the number of files removed.
    pub async fn clear_host_artifacts(
        &self,
        run: &RunId,
        step: StepPercent,
        query: &QueryName,
    ) -> StoreResult<usize> {
        let dir = self.query_dir(run, step, query);
        let mut removed = 0;
        for name in [Environment::Host.timing_file(), PROFILE_FILE, PROFILE_DUMP_FILE] {
            let path = dir.join(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        self.invalidate(run).await;
        Ok(removed)
    }

    /// Drop the cached tree of `run`. Callers that write into the run
    /// directory without going through the store must call this.
    pub async fn invalidate(&self, run: &RunId) {
        self.inner.cache.invalidate(run).await;
    }

    async fn build_tree(&self, run: &RunId) -> StoreResult<RunTree> {
        let run_dir = self.run_dir(run);
        let names = list_dirs(&run_dir).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::RunNotFound(run.to_string())
            } else {
                io_error(&run_dir, e)
            }
        })?;

        let mut steps: Vec<StepPercent> = names.iter().filter_map(|n| n.parse().ok()).collect();
        steps.sort();

        let mut trees = Vec::with_capacity(steps.len());
        for step in steps {
            let step_dir = self.step_dir(run, step);
            let mut queries: Vec<QueryName> = list_dirs(&step_dir)
                .await
                .map_err(io_err!(step_dir))?
                .iter()
                .filter_map(|n| QueryName::parse(n).ok())
                .collect();
            queries.sort();

            let mut artifacts = Vec::with_capacity(queries.len());
            for query in queries {
                artifacts.push(QueryArtifacts {
                    device_time: self.read_timing(run, step, &query, Environment::Device).await?,
                    host_time: self.read_timing(run, step, &query, Environment::Host).await?,
                    profile: self.read_profile(run, step, &query).await?,
                    query,
                });
            }

            let snapshot = self.snapshot_size(run, step).await?.map(|size| DbSnapshot {
                path: self.snapshot_path(run, step),
                size,
            });

            trees.push(StepTree {
                step,
                snapshot,
                queries: artifacts,
            });
        }

        Ok(RunTree {
            run: run.clone(),
            steps: trees,
        })
    }
}

/// Names of the subdirectories of `dir`.
async fn list_dirs(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(&path, e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_err!(parent))?;
    }
    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
    tokio::fs::write(path, bytes).await.map_err(io_err!(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunId {
        RunId::parse("20240521-134502").unwrap()
    }

    fn q(name: &str) -> QueryName {
        QueryName::parse(name).unwrap()
    }

    async fn seed(store: &ResultStore, step: u32, queries: &[&str]) {
        for name in queries {
            let record = TimingRecord::new(f64::from(step) / 100.0, 0.1, 0.05);
            store
                .write_timing(&run(), StepPercent(step), &q(name), Environment::Device, &record)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn stray_task_directory_does_not_clobber_step_column() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        seed(&store, 10, &["A"]).await;
        let stray = store.step_dir(&run(), StepPercent(10)).join("task");
        std::fs::create_dir_all(&stray).unwrap();
        std::fs::write(
            stray.join("android-time.json"),
            r#"{"real":9.0,"user":1.0,"system":1.0,"io":7.0}"#,
        )
        .unwrap();

        let table = store.timing_table(&run(), Environment::Device).await.unwrap();
        let json = serde_json::to_value(&table[0]).unwrap();
        assert_eq!(json["task"], 10);
        assert_eq!(table[0].real.len(), 1);
    }

    #[tokio::test]
    async fn list_queries_is_union_over_steps() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        seed(&store, 10, &["A", "B"]).await;
        seed(&store, 20, &["B", "C"]).await;

        let queries = store.list_queries(&run()).await.unwrap();
        assert_eq!(queries, vec![q("A"), q("B"), q("C")]);
    }

    #[tokio::test]
    async fn steps_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        for step in [100, 20, 5] {
            seed(&store, step, &["q1.sql"]).await;
        }
        std::fs::create_dir_all(dir.path().join("20240521-134502/notes")).unwrap();

        let steps = store.list_steps(&run()).await.unwrap();
        assert_eq!(steps, vec![StepPercent(5), StepPercent(20), StepPercent(100)]);
    }

    #[tokio::test]
    async fn get_run_twice_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        seed(&store, 10, &["q1.sql"]).await;

        let first = store.get_run(&run()).await.unwrap();
        let second = store.get_run(&run()).await.unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.cache().len().await, 1);
    }

    #[tokio::test]
    async fn writes_invalidate_cached_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        seed(&store, 10, &["q1.sql"]).await;
        let before = store.get_run(&run()).await.unwrap();
        assert_eq!(before.steps.len(), 1);

        seed(&store, 20, &["q1.sql"]).await;
        assert!(store.cache().is_empty().await);
        let after = store.get_run(&run()).await.unwrap();
        assert_eq!(after.steps.len(), 2);
    }

    #[tokio::test]
    async fn missing_artifacts_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        seed(&store, 10, &["q1.sql"]).await;

        let host = store
            .read_timing(&run(), StepPercent(10), &q("q1.sql"), Environment::Host)
            .await
            .unwrap();
        assert!(host.is_none());
        assert!(store.read_profile(&run(), StepPercent(10), &q("q1.sql")).await.unwrap().is_none());
        assert!(store.snapshot_size(&run(), StepPercent(10)).await.unwrap().is_none());
        assert!(
            store
                .read_timing(&run(), StepPercent(99), &q("nope"), Environment::Device)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn malformed_artifact_is_corrupt_not_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let qdir = store.query_dir(&run(), StepPercent(10), &q("q1.sql"));
        std::fs::create_dir_all(&qdir).unwrap();
        std::fs::write(qdir.join("host-time.json"), "{not json").unwrap();

        let err = store
            .read_timing(&run(), StepPercent(10), &q("q1.sql"), Environment::Host)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let err = store.get_run(&run()).await.unwrap_err();
        assert!(matches!(err, StoreError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn list_runs_skips_foreign_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        store.create_run(&RunId::parse("20240522-090000").unwrap()).await.unwrap();
        store.create_run(&run()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("has space")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), "").unwrap();

        let runs = store.list_runs().await.unwrap();
        assert_eq!(runs, vec![run(), RunId::parse("20240522-090000").unwrap()]);
    }

    #[tokio::test]
    async fn list_runs_on_missing_workspace_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("absent"));
        assert!(store.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timing_table_omits_missing_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        seed(&store, 10, &["A", "B"]).await;
        seed(&store, 20, &["A"]).await;

        let table = store.timing_table(&run(), Environment::Device).await.unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].real.len(), 2);
        assert_eq!(table[1].real.len(), 1);
        assert_eq!(table[1].real["A"], 0.2);

        let json = serde_json::to_value(&table[0]).unwrap();
        assert_eq!(json["task"], 10);
        assert_eq!(json["A"], 0.1);

        let host = store.timing_table(&run(), Environment::Host).await.unwrap();
        assert!(host.iter().all(|row| row.real.is_empty()));
    }

    #[tokio::test]
    async fn profile_series_and_snapshot_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let counters = ProfileCounters([("Column".to_string(), 5500)].into_iter().collect());
        for step in [10, 20] {
            store
                .write_profile(&run(), StepPercent(step), &q("q1.sql"), &counters)
                .await
                .unwrap();
        }
        std::fs::write(store.snapshot_path(&run(), StepPercent(20)), vec![0u8; 2048]).unwrap();
        store.invalidate(&run()).await;

        let series = store.profile_series(&run(), &q("q1.sql")).await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].counters["Column"], 5500);
        let json = serde_json::to_value(&series[0]).unwrap();
        assert_eq!(json["task"], 10);
        assert_eq!(json["Column"], 5500);

        let sizes = store.snapshot_sizes(&run()).await.unwrap();
        assert_eq!(
            sizes,
            vec![SnapshotSizeRow {
                step: StepPercent(20),
                size: 2048
            }]
        );
    }

    #[tokio::test]
    async fn clear_host_artifacts_keeps_device_timing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let step = StepPercent(10);
        let query = q("q1.sql");
        let record = TimingRecord::new(0.47, 0.46, 0.01);
        store.write_timing(&run(), step, &query, Environment::Device, &record).await.unwrap();
        store.write_timing(&run(), step, &query, Environment::Host, &record).await.unwrap();
        store.write_profile(&run(), step, &query, &ProfileCounters::default()).await.unwrap();
        std::fs::write(store.query_dir(&run(), step, &query).join(PROFILE_DUMP_FILE), "x").unwrap();

        let removed = store.clear_host_artifacts(&run(), step, &query).await.unwrap();
        assert_eq!(removed, 3);
        assert!(store.read_timing(&run(), step, &query, Environment::Device).await.unwrap().is_some());
        assert!(store.read_timing(&run(), step, &query, Environment::Host).await.unwrap().is_none());

        assert_eq!(store.clear_host_artifacts(&run(), step, &query).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn timing_json_uses_plain_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let path = store
            .write_timing(
                &run(),
                StepPercent(10),
                &q("q1.sql"),
                Environment::Device,
                &TimingRecord::new(0.22, 0.10, 0.05),
            )
            .await
            .unwrap();
        assert!(path.ends_with("10/q1.sql/android-time.json"));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        for key in ["real", "user", "system", "io"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
