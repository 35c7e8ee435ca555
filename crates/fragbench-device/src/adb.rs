//! adb-backed device implementation.
//!
//! Every call spawns the `adb` binary and is bounded by the configured
//! command timeout. A multi-minute bound is expected: copying a photo batch
//! or exporting a large database routinely takes minutes.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use fragbench_core::config::DeviceConfig;

use crate::device::{Device, DeviceFuture, DeviceHandle};
use crate::error::{DeviceError, DeviceResult};

/// Port used when switching a device to adb over TCP.
const WIFI_ADB_PORT: u16 = 5555;

/// A device as listed by `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub udid: String,
    pub state: String,
    pub selected: bool,
}

/// Invokes the adb binary.
#[derive(Debug, Clone)]
pub struct AdbClient {
    program: String,
    timeout: Duration,
}

impl AdbClient {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            config.adb.clone(),
            Duration::from_secs(config.command_timeout_secs),
        )
    }

    /// Run `adb <args>` and return stdout.
    pub async fn exec(&self, args: &[&str]) -> DeviceResult<String> {
        let rendered = format!("{} {}", self.program, args.join(" "));
        debug!(command = %rendered, "adb exec");

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| DeviceError::Timeout {
                command: rendered.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| DeviceError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if is_connectivity_error(&stderr) {
            return Err(DeviceError::Unavailable(stderr.trim().to_string()));
        }
        Err(DeviceError::Command {
            command: rendered,
            code: output.status.code().unwrap_or(-1),
            output: format!("{stdout}{stderr}"),
        })
    }

    /// List devices known to the adb server.
    pub async fn list_devices(&self) -> DeviceResult<Vec<DeviceInfo>> {
        let raw = self.exec(&["devices"]).await?;
        Ok(parse_devices(&raw))
    }

    /// Connect to `serial`, or to the first attached device when unset.
    pub async fn connect(&self, serial: Option<&str>, root: bool) -> DeviceResult<AdbDevice> {
        let serial = match serial {
            Some(s) => s.to_string(),
            None => self
                .list_devices()
                .await?
                .into_iter()
                .find(|d| d.state == "device")
                .map(|d| d.udid)
                .ok_or_else(|| DeviceError::Unavailable("no connected devices".to_string()))?,
        };

        if root {
            self.exec(&["-s", &serial, "root"]).await?;
            self.exec(&["-s", &serial, "wait-for-device"]).await?;
        }

        info!(%serial, root, "device connected");
        Ok(AdbDevice {
            client: self.clone(),
            serial,
        })
    }

    /// Switch the device behind `handle` to adb over Wi-Fi and connect to it.
    ///
    /// The device address is the last token of `ip route`.
    pub async fn connect_over_wifi(&self, handle: &mut DeviceHandle) -> DeviceResult<AdbDevice> {
        let serial = handle
            .id()
            .ok_or_else(|| DeviceError::Unavailable("no connected devices".to_string()))?
            .to_string();
        let route = handle.shell("ip route").await?;
        let ip = route
            .split_whitespace()
            .last()
            .ok_or_else(|| DeviceError::InvalidArgument(format!("no address in {route:?}")))?
            .to_string();

        let port = WIFI_ADB_PORT.to_string();
        self.exec(&["-s", &serial, "tcpip", &port]).await?;
        let address = format!("{ip}:{WIFI_ADB_PORT}");
        self.exec(&["connect", &address]).await?;

        info!(%address, "device connected over wifi");
        Ok(AdbDevice {
            client: self.clone(),
            serial: address,
        })
    }
}

/// Parse `adb devices` output (`<serial>\t<state>` after a header line).
pub fn parse_devices(raw: &str) -> Vec<DeviceInfo> {
    raw.lines()
        .filter(|l| !l.starts_with("List of devices") && !l.starts_with('*'))
        .filter_map(|l| {
            let mut parts = l.split_whitespace();
            let udid = parts.next()?;
            let state = parts.next()?;
            Some(DeviceInfo {
                udid: udid.to_string(),
                state: state.to_string(),
                selected: false,
            })
        })
        .collect()
}

fn is_connectivity_error(stderr: &str) -> bool {
    let s = stderr.to_ascii_lowercase();
    s.contains("no devices")
        || device_not_found(&s)
        || s.contains("device offline")
        || s.contains("unauthorized")
        || s.contains("error: closed")
}

/// adb's own lookup failure: `device not found` or `device '<serial>' not found`.
/// Shell errors such as `sh: foo: not found` come from the device and do not count.
fn device_not_found(s: &str) -> bool {
    s.lines().any(|line| {
        let Some(rest) = line.trim().strip_prefix("error: device ") else {
            return false;
        };
        rest == "not found"
            || (rest.starts_with('\'') && rest.ends_with("' not found"))
    })
}

/// One device reached through adb.
#[derive(Debug, Clone)]
pub struct AdbDevice {
    client: AdbClient,
    serial: String,
}

impl AdbDevice {
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl Device for AdbDevice {
    fn id(&self) -> Option<&str> {
        Some(&self.serial)
    }

    fn shell<'a>(&'a self, command: &'a str) -> DeviceFuture<'a, String> {
        Box::pin(async move {
            self.client
                .exec(&["-s", &self.serial, "shell", command])
                .await
        })
    }

    fn push<'a>(&'a self, local: &'a Path, remote: &'a str) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            let local = local.to_string_lossy();
            self.client
                .exec(&["-s", &self.serial, "push", &local, remote])
                .await?;
            Ok(())
        })
    }

    fn pull<'a>(&'a self, remote: &'a str, local: &'a Path) -> DeviceFuture<'a, ()> {
        Box::pin(async move {
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let local = local.to_string_lossy();
            self.client
                .exec(&["-s", &self.serial, "pull", remote, &local])
                .await?;
            Ok(())
        })
    }

    fn reboot(&self) -> DeviceFuture<'_, ()> {
        Box::pin(async move {
            self.client.exec(&["-s", &self.serial, "reboot"]).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_devices_output() {
        let raw = "* daemon started successfully\n\
                   List of devices attached\n\
                   R58M123ABC\tdevice\n\
                   192.168.0.12:5555\toffline\n\n";
        let devices = parse_devices(raw);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].udid, "R58M123ABC");
        assert_eq!(devices[0].state, "device");
        assert_eq!(devices[1].state, "offline");
    }

    #[test]
    fn parse_devices_empty() {
        assert!(parse_devices("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn connectivity_errors_are_recognized() {
        assert!(is_connectivity_error("error: no devices/emulators found"));
        assert!(is_connectivity_error("error: device 'abc' not found"));
        assert!(is_connectivity_error("error: device offline"));
        assert!(!is_connectivity_error("rm: /sdcard/x: Permission denied"));
        assert!(is_connectivity_error("error: device not found"));
        assert!(!is_connectivity_error("/system/bin/sh: f2fs.fibmap: not found"));
        assert!(!is_connectivity_error("sh: foo: not found"));
    }

    #[tokio::test]
    async fn missing_adb_binary_is_spawn_error() {
        let client = AdbClient::new("/nonexistent/adb-binary", Duration::from_secs(5));
        let err = client.exec(&["devices"]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Spawn { .. }));
    }
}
