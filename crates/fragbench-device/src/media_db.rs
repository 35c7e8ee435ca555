//! Maintenance operations on the device's media provider database.
//!
//! All SQL is piped into the device's `sqlite3` binary. Single quotes in a
//! statement are rewritten to double quotes so the statement survives the
//! surrounding `echo '…'`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info};

use fragbench_core::ParseError;
use fragbench_core::config::PathsConfig;

use crate::device::{BestEffort, DeviceHandle};
use crate::error::{DeviceError, DeviceResult};

const TRIGGER_DROP: &str = "DROP TRIGGER IF EXISTS files_update;";

const TRIGGER_CREATE: &str = "CREATE TRIGGER files_update AFTER UPDATE ON files BEGIN SELECT _UPDATE(old.volume_name||':'||old._id||':'||old.media_type||':'||old.is_download||':'||new._id||':'||new.media_type||':'||new.is_download||':'||old.is_trashed||':'||new.is_trashed||':'||old.is_pending||':'||new.is_pending||':'||old.is_favorite||':'||new.is_favorite||':'||ifnull(old._special_format,0)||':'||ifnull(new._special_format,0)||':'||ifnull(old.owner_package_name,'null')||':'||ifnull(new.owner_package_name,'null')||':'||old._data); END;";

const RANDOM_UPDATE: &str = "UPDATE files SET date_modified = date_modified + 1 WHERE _id = (SELECT _id FROM files ORDER BY RANDOM() LIMIT 1);";

/// `f2fs.fibmap` prints a 16-line header before the extent rows.
const FIBMAP_HEADER_LINES: u32 = 16;

/// Source images staged into the fill batch, in ratio order.
pub const BATCH_SOURCES: [&str; 2] = ["img.jpeg", "xmp.jpeg"];

/// Result of a bulk fragmentation pass.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentationReport {
    /// Transactions committed before the pass ended.
    pub transactions: u32,
    pub trigger_restore: BestEffort,
}

/// Media database and DCIM layout on the device.
#[derive(Debug, Clone)]
pub struct MediaDb {
    external_db: String,
    dcim: String,
    remote_query_dir: String,
    sources: PathBuf,
}

impl MediaDb {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            external_db: paths.remote_external_db.clone(),
            dcim: paths.remote_dcim.clone(),
            remote_query_dir: paths.remote_query_dir.clone(),
            sources: paths.sources.clone(),
        }
    }

    pub fn external_db(&self) -> &str {
        &self.external_db
    }

    pub fn dcim(&self) -> &str {
        &self.dcim
    }

    pub fn remote_query_dir(&self) -> &str {
        &self.remote_query_dir
    }

    /// Directory holding the staged batch that fill copies.
    pub fn batch_dir(&self) -> String {
        format!("{}/batch", self.dcim)
    }

    // ── SQL ─────────────────────────────────────────────────────────

    /// Pipe `sql` into `sqlite3` against the media database.
    pub async fn execute_sql(&self, device: &mut DeviceHandle, sql: &str) -> DeviceResult<String> {
        let command = format!(
            "echo '{}' | sqlite3 {}",
            sql.replace('\'', "\""),
            self.external_db
        );
        device.shell(&command).await
    }

    async fn count(&self, device: &mut DeviceHandle, sql: &str) -> DeviceResult<u64> {
        let raw = self.execute_sql(device, sql).await?;
        parse_count(sql, &raw)
    }

    pub async fn pending_count(&self, device: &mut DeviceHandle) -> DeviceResult<u64> {
        self.count(device, "SELECT COUNT(*) FROM images WHERE is_pending = 1;")
            .await
    }

    pub async fn image_count(&self, device: &mut DeviceHandle) -> DeviceResult<u64> {
        self.count(device, "SELECT COUNT(*) FROM images;").await
    }

    pub async fn force_pending_to_zero(&self, device: &mut DeviceHandle) -> DeviceResult<()> {
        self.execute_sql(device, "UPDATE files SET is_pending = 0 WHERE is_pending = 1;")
            .await?;
        info!("pending media rows cleared");
        Ok(())
    }

    pub async fn drop_trigger(&self, device: &mut DeviceHandle) -> DeviceResult<()> {
        self.execute_sql(device, TRIGGER_DROP).await?;
        Ok(())
    }

    pub async fn create_trigger(&self, device: &mut DeviceHandle) -> DeviceResult<()> {
        self.execute_sql(device, TRIGGER_CREATE).await?;
        Ok(())
    }

    /// Scatter the `files` table across the file system.
    ///
    /// The `files_update` trigger is dropped first and recreated afterwards
    /// whether or not the updates succeed. An update failure is returned
    /// after the restore attempt; a restore failure is reported in the
    /// returned [`FragmentationReport`].
    pub async fn fragmentate(
        &self,
        device: &mut DeviceHandle,
        batches: u32,
        updates_per_batch: u32,
    ) -> DeviceResult<FragmentationReport> {
        self.drop_trigger(device).await?;

        let mut transaction = String::from("BEGIN TRANSACTION;");
        for _ in 0..updates_per_batch {
            transaction.push_str(RANDOM_UPDATE);
        }
        transaction.push_str("COMMIT;");

        let mut committed = 0;
        let mut failure = None;
        for _ in 0..batches {
            if let Err(e) = self.execute_sql(device, &transaction).await {
                failure = Some(e);
                break;
            }
            committed += 1;
        }

        let trigger_restore = BestEffort::from_result(
            "restore files_update trigger",
            self.create_trigger(device).await,
        );

        if let Some(e) = failure {
            return Err(e);
        }
        info!(transactions = committed, "fragmentation pass finished");
        Ok(FragmentationReport {
            transactions: committed,
            trigger_restore,
        })
    }

    // ── File system ─────────────────────────────────────────────────

    /// Number of extents backing the media database file.
    pub async fn fragmentation_extents(&self, device: &mut DeviceHandle) -> DeviceResult<u64> {
        let command = format!(
            "f2fs.fibmap {} | tail -n +{} | wc -l",
            self.external_db,
            FIBMAP_HEADER_LINES + 1
        );
        let raw = device.shell(&command).await?;
        parse_count(&command, &raw)
    }

    /// Size in bytes of the live media database.
    pub async fn db_size(&self, device: &mut DeviceHandle) -> DeviceResult<u64> {
        let command = format!("stat -c %s {}", self.external_db);
        let raw = device.shell(&command).await?;
        parse_count(&command, &raw)
    }

    /// Images in the staged batch times the number of batch copies.
    pub async fn fs_image_count(&self, device: &mut DeviceHandle) -> DeviceResult<u64> {
        let per_batch_cmd = format!("ls {} | wc -l", self.batch_dir());
        let raw = device.shell(&per_batch_cmd).await?;
        let per_batch = parse_count(&per_batch_cmd, &raw)?;

        let copies_cmd = format!("ls {} | grep '^batch-' | wc -l", self.dcim);
        let raw = device.shell(&copies_cmd).await?;
        let copies = parse_count(&copies_cmd, &raw)?;

        Ok(per_batch * copies)
    }

    pub async fn broadcast_refresh(&self, device: &mut DeviceHandle) -> DeviceResult<String> {
        device
            .shell("am broadcast -a android.intent.action.MEDIA_MOUNTED -d file:///sdcard")
            .await
    }

    /// Replace the remote query directory with the local one.
    pub async fn push_queries(&self, device: &mut DeviceHandle, local: &Path) -> DeviceResult<()> {
        device
            .shell(&format!("rm -rf {}", self.remote_query_dir))
            .await?;
        device.push(local, &self.remote_query_dir).await?;
        info!(local = %local.display(), remote = %self.remote_query_dir, "queries pushed");
        Ok(())
    }

    /// Stage `total` images into the fill batch, split between the source
    /// images by `img_ratio : xmp_ratio`.
    pub async fn generate_batch(
        &self,
        device: &mut DeviceHandle,
        total: u32,
        img_ratio: u32,
        xmp_ratio: u32,
    ) -> DeviceResult<BTreeMap<String, u32>> {
        let counts = split_batch(total, img_ratio, xmp_ratio)?;

        device.shell(&format!("mkdir -p {}", self.dcim)).await?;
        for source in BATCH_SOURCES {
            let local = self.sources.join(source);
            device
                .push(&local, &format!("{}/{source}", self.dcim))
                .await?;
        }

        let batch = self.batch_dir();
        device.shell(&format!("rm -rf {batch}")).await?;
        device.shell(&format!("mkdir -p {batch}")).await?;
        for (source, count) in &counts {
            for i in 0..*count {
                device
                    .shell(&format!("cp {}/{source} {batch}/{i:03}-{source}", self.dcim))
                    .await?;
            }
        }

        info!(?counts, "fill batch staged");
        Ok(counts)
    }

    /// Copy the live database out to `local`.
    ///
    /// The database is first copied to a temporary path on shared storage,
    /// which is removed again whatever the outcome of the pull.
    pub async fn export_db(&self, device: &mut DeviceHandle, local: &Path) -> DeviceResult<u64> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = format!("/sdcard/tmp-{}.db", Local::now().format("%H%M%S%3f"));

        let pulled = async {
            device
                .shell(&format!("cp {} {tmp}", self.external_db))
                .await?;
            device.pull(&tmp, local).await
        }
        .await;
        let cleanup = device.shell(&format!("rm {tmp}")).await;

        pulled?;
        cleanup?;

        let size = tokio::fs::metadata(local).await?.len();
        debug!(local = %local.display(), size, "database exported");
        Ok(size)
    }
}

/// Split `total` by ratio, rounding each share.
pub fn split_batch(total: u32, img_ratio: u32, xmp_ratio: u32) -> DeviceResult<BTreeMap<String, u32>> {
    let sum = img_ratio + xmp_ratio;
    if sum == 0 {
        return Err(DeviceError::InvalidArgument(
            "image ratios must not both be zero".to_string(),
        ));
    }
    Ok(BATCH_SOURCES
        .iter()
        .zip([img_ratio, xmp_ratio])
        .map(|(source, ratio)| {
            let share = (f64::from(ratio) / f64::from(sum) * f64::from(total)).round() as u32;
            ((*source).to_string(), share)
        })
        .collect())
}

fn parse_count(command: &str, raw: &str) -> DeviceResult<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        DeviceError::Parse(ParseError::Numeric {
            source_cmd: command.to_string(),
            raw: raw.trim().to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SimDevice;

    fn media_db() -> MediaDb {
        MediaDb::new(&PathsConfig::default())
    }

    fn handle(sim: &SimDevice) -> DeviceHandle {
        DeviceHandle::new(Box::new(sim.clone()), "/storage/emulated/0")
    }

    #[test]
    fn split_batch_rounds_each_share() {
        let counts = split_batch(100, 1, 2).unwrap();
        assert_eq!(counts["img.jpeg"], 33);
        assert_eq!(counts["xmp.jpeg"], 67);
    }

    #[test]
    fn split_batch_rejects_zero_ratios() {
        assert!(matches!(
            split_batch(10, 0, 0),
            Err(DeviceError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn single_quotes_are_rewritten() {
        let sim = SimDevice::new();
        let mut device = handle(&sim);
        media_db()
            .execute_sql(&mut device, "SELECT 'a';")
            .await
            .unwrap();
        let log = sim.commands();
        assert!(log[0].starts_with("echo 'SELECT \"a\";' | sqlite3 "));
    }

    #[tokio::test]
    async fn counts_are_parsed() {
        let sim = SimDevice::new();
        sim.respond("is_pending = 1", "42\n");
        let mut device = handle(&sim);
        assert_eq!(media_db().pending_count(&mut device).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn garbage_count_is_parse_error() {
        let sim = SimDevice::new();
        sim.respond("FROM images;", "Error: no such table: images\n");
        let mut device = handle(&sim);
        let err = media_db().image_count(&mut device).await.unwrap_err();
        assert!(matches!(err, DeviceError::Parse(ParseError::Numeric { .. })));
    }

    #[tokio::test]
    async fn fragmentate_restores_trigger_after_success() {
        let sim = SimDevice::new();
        let mut device = handle(&sim);
        let report = media_db().fragmentate(&mut device, 3, 2).await.unwrap();
        assert_eq!(report.transactions, 3);
        assert!(report.trigger_restore.is_completed());

        let log = sim.commands();
        assert!(log.first().unwrap().contains("DROP TRIGGER"));
        assert!(log.last().unwrap().contains("CREATE TRIGGER files_update"));
        assert_eq!(log.iter().filter(|c| c.contains("BEGIN TRANSACTION")).count(), 3);
    }

    #[tokio::test]
    async fn fragmentate_restores_trigger_after_failure() {
        let sim = SimDevice::new();
        sim.fail_on("BEGIN TRANSACTION", "database is locked");
        let mut device = handle(&sim);
        let err = media_db().fragmentate(&mut device, 5, 1).await.unwrap_err();
        assert!(matches!(err, DeviceError::Command { .. }));

        let log = sim.commands();
        assert!(log.last().unwrap().contains("CREATE TRIGGER files_update"));
        assert_eq!(log.iter().filter(|c| c.contains("BEGIN TRANSACTION")).count(), 1);
    }

    #[tokio::test]
    async fn fs_image_count_multiplies() {
        let sim = SimDevice::new();
        sim.respond("ls /sdcard/DCIM/batch |", "100\n");
        sim.respond("grep '^batch-'", "7\n");
        let mut device = handle(&sim);
        assert_eq!(media_db().fs_image_count(&mut device).await.unwrap(), 700);
    }

    #[tokio::test]
    async fn export_db_removes_temp_file_when_pull_fails() {
        let sim = SimDevice::new();
        sim.fail_pulls("device offline");
        let mut device = handle(&sim);
        let dir = tempfile::tempdir().unwrap();
        let err = media_db()
            .export_db(&mut device, &dir.path().join("10/external.db"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Unavailable(_)));
        assert!(sim.commands().last().unwrap().starts_with("rm /sdcard/tmp-"));
    }

    #[tokio::test]
    async fn export_db_reports_size() {
        let sim = SimDevice::new();
        sim.set_snapshot_bytes(vec![0u8; 4096]);
        let mut device = handle(&sim);
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("10/external.db");
        let size = media_db().export_db(&mut device, &local).await.unwrap();
        assert_eq!(size, 4096);
        assert!(local.exists());
    }

    #[tokio::test]
    async fn push_queries_replaces_remote_dir() {
        let sim = SimDevice::new();
        let mut device = handle(&sim);
        media_db()
            .push_queries(&mut device, Path::new("sources/queries"))
            .await
            .unwrap();
        assert_eq!(sim.commands(), vec!["rm -rf /sdcard/queries".to_string()]);
        assert_eq!(
            sim.pushes(),
            vec![(PathBuf::from("sources/queries"), "/sdcard/queries".to_string())]
        );
    }
}
