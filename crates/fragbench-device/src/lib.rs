//! fragbench-device: access to the device under test and to the host.
//!
//! # Architecture
//!
//! ```text
//! DeviceHandle (single owner, &mut self on every call)
//!   └── Box<dyn Device>
//!         ├── AdbDevice   ← `adb -s <serial> …` under a timeout
//!         ├── Detached    ← no device connected, every call is Unavailable
//!         └── SimDevice   ← scripted device (feature = "mock")
//!
//! MediaDb  ← operations on the device's media database over a DeviceHandle
//! HostShell
//!   ├── BashShell     ← `bash -c` on this machine
//!   └── ScriptedHost  ← (feature = "mock")
//! ```
//!
//! The device and its single SQLite instance are a serially accessed
//! resource. `DeviceHandle` makes that explicit: holding `&mut DeviceHandle`
//! is the only way to issue a device command.

pub mod adb;
pub mod device;
pub mod error;
pub mod host;
pub mod media_db;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use adb::{AdbClient, AdbDevice, DeviceInfo};
pub use device::{BestEffort, Detached, Device, DeviceFuture, DeviceHandle};
pub use error::{DeviceError, DeviceResult};
pub use host::{BashShell, HostFuture, HostShell};
pub use media_db::{FragmentationReport, MediaDb};
