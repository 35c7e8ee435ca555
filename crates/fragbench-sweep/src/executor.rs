//! Device and host replays of one query.
//!
//! Both sides stream `.eqp on` / `.scanstats on` followed by the query text
//! into `sqlite3` under `time`, and keep only the tail of the combined
//! output where the timing report lands. The two `time` implementations
//! print different layouts, so each side has its own parser.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use fragbench_core::{
    BenchConfig, Environment, ProfileCounters, QueryName, TimingRecord, aggregate_file, parse_timing,
};
use fragbench_device::{DeviceHandle, HostShell};
use fragbench_store::PROFILE_DUMP_FILE;

use crate::error::{SweepError, SweepResult};

const INSTRUMENTATION: &str = "echo -e \".eqp on\\n.scanstats on\\n\"";

/// Result of one host replay.
#[derive(Debug, Clone)]
pub struct HostExecution {
    pub timing: TimingRecord,
    pub profile: Option<ProfileCounters>,
}

/// Runs a query on the device and on the host replica.
#[derive(Clone)]
pub struct DualExecutor {
    remote_query_dir: String,
    remote_db: String,
    sqlite: String,
    time: String,
    require_profile: bool,
    host: Arc<dyn HostShell>,
}

impl DualExecutor {
    pub fn new(config: &BenchConfig, host: Arc<dyn HostShell>) -> Self {
        Self {
            remote_query_dir: config.paths.remote_query_dir.clone(),
            remote_db: config.paths.remote_external_db.clone(),
            sqlite: config.host.sqlite.clone(),
            time: config.host.time.clone(),
            require_profile: config.host.require_profile,
            host,
        }
    }

    pub fn device_command(&self, query: &QueryName) -> String {
        format!(
            "(({INSTRUMENTATION} ; cat {}/{query}) | time sqlite3 {}) 2>&1 | tail -n 1",
            self.remote_query_dir, self.remote_db
        )
    }

    pub fn host_command(&self, query_file: &Path, snapshot: &Path) -> String {
        format!(
            "(({INSTRUMENTATION} ; cat {}) | {} {} {}) 2>&1 | tail -n 2",
            query_file.display(),
            self.time,
            self.sqlite,
            snapshot.display()
        )
    }

    /// Replay `query` on the device against the live database.
    ///
    /// Page, dentry and inode caches are dropped first so no query benefits
    /// from the one before it.
    pub async fn run_on_device(
        &self,
        device: &mut DeviceHandle,
        query: &QueryName,
    ) -> SweepResult<TimingRecord> {
        device.drop_cache().await?;
        let raw = device.shell(&self.device_command(query)).await?;
        let timing = parse_timing(Environment::Device, &raw)?;
        debug!(%query, real = timing.real, "device replay finished");
        Ok(timing)
    }

    /// Replay `query_file` against `snapshot` with `query_dir` as working
    /// directory, where the engine writes its profile dump.
    ///
    /// A dump left by an earlier replay is removed first so counters never
    /// accumulate across executions.
    pub async fn run_on_host(
        &self,
        query_dir: &Path,
        query_file: &Path,
        snapshot: &Path,
    ) -> SweepResult<HostExecution> {
        let query_file = tokio::fs::canonicalize(query_file).await?;
        let snapshot = tokio::fs::canonicalize(snapshot).await?;
        let dump = query_dir.join(PROFILE_DUMP_FILE);
        match tokio::fs::remove_file(&dump).await {
            Ok(()) => debug!(path = %dump.display(), "stale profile dump removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let command = self.host_command(&query_file, &snapshot);
        let raw = self.host.exec(&command, query_dir).await?;
        let timing = parse_timing(Environment::Host, &raw)?;

        let profile = if tokio::fs::try_exists(&dump).await? {
            Some(aggregate_file(&dump).await?)
        } else if self.require_profile {
            return Err(SweepError::MissingProfile(dump.display().to_string()));
        } else {
            warn!(path = %dump.display(), "no profile dump, skipping aggregation");
            None
        };

        debug!(query = %query_file.display(), real = timing.real, "host replay finished");
        Ok(HostExecution { timing, profile })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragbench_device::mock::{ScriptedHost, SimDevice};

    fn executor(host: ScriptedHost, require_profile: bool) -> DualExecutor {
        let mut config = BenchConfig::default();
        config.host.require_profile = require_profile;
        DualExecutor::new(&config, Arc::new(host))
    }

    fn fixture() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let query = dir.path().join("q1.sql");
        std::fs::write(&query, "SELECT COUNT(*) FROM files;").unwrap();
        let snapshot = dir.path().join("external.db");
        std::fs::write(&snapshot, b"SQLite format 3\0").unwrap();
        (dir, query, snapshot)
    }

    #[test]
    fn device_command_layout() {
        let exec = executor(ScriptedHost::new(), true);
        let cmd = exec.device_command(&QueryName::parse("q1.sql").unwrap());
        assert_eq!(
            cmd,
            "((echo -e \".eqp on\\n.scanstats on\\n\" ; cat /sdcard/queries/q1.sql) | time sqlite3 \
             /data/user/0/com.android.providers.media.module/databases/external.db) 2>&1 | tail -n 1"
        );
    }

    #[tokio::test]
    async fn device_replay_drops_cache_first() {
        let sim = SimDevice::new();
        let mut device = DeviceHandle::new(Box::new(sim.clone()), "/storage/emulated/0");
        let exec = executor(ScriptedHost::new(), true);

        let timing = exec
            .run_on_device(&mut device, &QueryName::parse("q1.sql").unwrap())
            .await
            .unwrap();
        assert!((timing.real - 0.22).abs() < 1e-9);
        assert!((timing.io - 0.07).abs() < 1e-9);

        let log = sim.commands();
        assert!(log[0].contains("drop_caches"));
        assert!(log[1].contains("time sqlite3"));
    }

    #[tokio::test]
    async fn host_replay_parses_timing_and_profile() {
        let (dir, query, snapshot) = fixture();
        let host = ScriptedHost::new();
        let exec = executor(host.clone(), true);

        let result = exec.run_on_host(dir.path(), &query, &snapshot).await.unwrap();
        assert!((result.timing.real - 0.47).abs() < 1e-9);
        assert!((result.timing.user - 0.46).abs() < 1e-9);
        let profile = result.profile.unwrap();
        assert_eq!(profile.get("OpenRead"), Some(48211));

        let (command, cwd) = &host.commands()[0];
        assert!(command.contains("| /usr/bin/time sqlite3 "));
        assert!(command.ends_with("2>&1 | tail -n 2"));
        assert_eq!(cwd, dir.path());
    }

    #[tokio::test]
    async fn stale_dump_does_not_accumulate() {
        let (dir, query, snapshot) = fixture();
        let exec = executor(ScriptedHost::new(), true);

        exec.run_on_host(dir.path(), &query, &snapshot).await.unwrap();
        let second = exec.run_on_host(dir.path(), &query, &snapshot).await.unwrap();
        assert_eq!(second.profile.unwrap().get("Init"), Some(1204));
    }

    #[tokio::test]
    async fn missing_profile_is_error_when_required() {
        let (dir, query, snapshot) = fixture();
        let exec = executor(ScriptedHost::new().without_profile(), true);
        let err = exec.run_on_host(dir.path(), &query, &snapshot).await.unwrap_err();
        assert!(matches!(err, SweepError::MissingProfile(_)));
    }

    #[tokio::test]
    async fn missing_profile_is_skipped_when_optional() {
        let (dir, query, snapshot) = fixture();
        let exec = executor(ScriptedHost::new().without_profile(), false);
        let result = exec.run_on_host(dir.path(), &query, &snapshot).await.unwrap();
        assert!(result.profile.is_none());
    }

    #[tokio::test]
    async fn garbled_timing_is_parse_error() {
        let (dir, query, snapshot) = fixture();
        let host = ScriptedHost::new();
        host.set_output("Error: unable to open database\n");
        let exec = executor(host, true);
        let err = exec.run_on_host(dir.path(), &query, &snapshot).await.unwrap_err();
        assert!(matches!(err, SweepError::Parse(_)));
    }
}
