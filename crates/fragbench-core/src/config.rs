//! fragbench.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration for a single rooted Android device.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub device: DeviceConfig,
    pub paths: PathsConfig,
    pub occupancy: OccupancyConfig,
    pub host: HostConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Path to the adb binary.
    pub adb: String,
    /// Device serial. The first connected device is used when unset.
    pub serial: Option<String>,
    /// Upper bound for any single device command.
    pub command_timeout_secs: u64,
    /// Restart adbd as root on connect.
    pub root: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb: "adb".to_string(),
            serial: None,
            command_timeout_secs: 300,
            root: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the result store.
    pub workspace: PathBuf,
    /// Local sources: `queries/` plus the batch source images.
    pub sources: PathBuf,
    pub remote_query_dir: String,
    pub remote_external_db: String,
    pub remote_dcim: String,
    /// Volume whose occupancy is controlled.
    pub remote_volume: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            sources: PathBuf::from("sources"),
            remote_query_dir: "/sdcard/queries".to_string(),
            remote_external_db:
                "/data/user/0/com.android.providers.media.module/databases/external.db"
                    .to_string(),
            remote_dcim: "/sdcard/DCIM".to_string(),
            remote_volume: "/storage/emulated/0".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn local_query_dir(&self) -> PathBuf {
        self.sources.join("queries")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    /// Consecutive unchanged measurements before convergence is abandoned.
    /// Zero is rejected at parse time.
    pub stall_threshold: NonZeroU32,
    /// Timestamped copies of the staged batch made per fill batch.
    pub fill_copies_per_batch: u32,
    /// Time budget for one drain removal.
    pub drain_timeout_secs: u64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            stall_threshold: NonZeroU32::MIN.saturating_add(9),
            fill_copies_per_batch: 10,
            drain_timeout_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub shell: String,
    pub sqlite: String,
    pub time: String,
    pub command_timeout_secs: u64,
    /// Fail a host execution when the engine leaves no profile dump.
    pub require_profile: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            sqlite: "sqlite3".to_string(),
            time: "/usr/bin/time".to_string(),
            command_timeout_secs: 300,
            require_profile: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl BenchConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BenchConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.is_file() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let config: BenchConfig = toml::from_str("").unwrap();
        assert_eq!(config.occupancy.stall_threshold.get(), 10);
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.device.command_timeout_secs, 300);
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[device]
serial = "emulator-5554"

[paths]
workspace = "/home/ids/ssd/workspace"

[occupancy]
stall_threshold = 3
"#;
        let config: BenchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.device.adb, "adb");
        assert_eq!(config.paths.workspace, PathBuf::from("/home/ids/ssd/workspace"));
        assert_eq!(config.paths.remote_query_dir, "/sdcard/queries");
        assert_eq!(config.occupancy.stall_threshold.get(), 3);
        assert_eq!(config.occupancy.fill_copies_per_batch, 10);
    }

    #[test]
    fn test_zero_stall_threshold_rejected() {
        assert!(toml::from_str::<BenchConfig>("[occupancy]\nstall_threshold = 0\n").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragbench.toml");
        std::fs::write(&path, "[occupancy]\nstall_threshold = 0\n").unwrap();
        assert!(BenchConfig::load_or_default(&path).is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let toml_str = BenchConfig::default().to_toml_string().unwrap();
        assert!(toml_str.contains("remote_external_db"));
        let back: BenchConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.host.sqlite, "sqlite3");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig::load_or_default(&dir.path().join("fragbench.toml")).unwrap();
        assert_eq!(config.paths.local_query_dir(), PathBuf::from("sources/queries"));
    }
}
