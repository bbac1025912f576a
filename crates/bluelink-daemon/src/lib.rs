//! # bluelink-daemon - Device Control Channel
//!
//! Manages the interactive `bluetoothctl` session that pairing and connection
//! commands go through, plus the one-shot `bluetoothctl devices [Class]`
//! queries used to list devices.
//!
//! Depends on [`bluelink_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Control Channel
//! - [`LocalDeviceControl`] / [`DeviceControl`] - Trait the lifecycle manager talks to
//! - [`ControlOptions`] - Program, startup commands and timeouts
//! - [`ensure_accepted()`] - Detect BlueZ rejections in command output
//!
//! ### Process Management
//! - [`CtlSession`] - Restartable persistent session (implements the trait)
//! - [`CtlProcess`] - A single interpreter child process
//!
//! ### Device Queries
//! - [`query_devices()`] - Run `devices [Class]` as its own process

pub mod control;
pub mod devices;
pub mod process;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use control::{
    ensure_accepted, resolve_program, ControlOptions, DeviceControl, LocalDeviceControl,
    DEFAULT_PROGRAM, DEFAULT_STARTUP_COMMANDS,
};
pub use devices::query_devices;
pub use process::{CtlProcess, CtlSession};
