//! Test utilities for the control channel
//!
//! [`MockControl`] is a scripted, in-memory stand-in for `bluetoothctl`. It
//! tracks which devices are paired and connected, answers `devices [Class]`
//! queries from that state, records every command, and can be told to fail
//! or reject upcoming calls.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use bluelink_core::prelude::*;
use bluelink_core::{canonical_address, DeviceClass};

use crate::control::LocalDeviceControl;

#[derive(Debug, Default)]
struct MockState {
    nearby: BTreeMap<String, String>,
    paired: BTreeMap<String, String>,
    connected: BTreeMap<String, String>,
    commands: Vec<String>,
    queries: Vec<DeviceClass>,
    failures_remaining: usize,
    rejected_prefixes: Vec<String>,
    restarts: usize,
    shutdowns: usize,
}

/// Scripted control channel.
#[derive(Debug, Default)]
pub struct MockControl {
    state: Mutex<MockState>,
}

impl MockControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A device that shows up in the unfiltered `devices` listing.
    pub fn with_nearby(self, address: &str, name: &str) -> Self {
        self.state()
            .nearby
            .insert(canonical_address(address), name.to_string());
        self
    }

    pub fn with_paired(self, address: &str, name: &str) -> Self {
        self.state()
            .paired
            .insert(canonical_address(address), name.to_string());
        self
    }

    /// Paired and connected.
    pub fn with_connected(self, address: &str, name: &str) -> Self {
        {
            let mut state = self.state();
            state
                .paired
                .insert(canonical_address(address), name.to_string());
            state
                .connected
                .insert(canonical_address(address), name.to_string());
        }
        self
    }

    /// Make the next `count` calls (commands or queries) fail with
    /// [`Error::ControlExited`].
    pub fn fail_next(&self, count: usize) {
        self.state().failures_remaining = count;
    }

    /// Answer commands starting with `prefix` with a BlueZ failure message.
    pub fn reject(&self, prefix: &str) {
        self.state().rejected_prefixes.push(prefix.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn queries(&self) -> Vec<DeviceClass> {
        self.state().queries.clone()
    }

    pub fn restarts(&self) -> usize {
        self.state().restarts
    }

    pub fn shutdowns(&self) -> usize {
        self.state().shutdowns
    }

    pub fn is_paired(&self, address: &str) -> bool {
        self.state()
            .paired
            .contains_key(&canonical_address(address))
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.state()
            .connected
            .contains_key(&canonical_address(address))
    }

    fn take_failure(state: &mut MockState) -> Result<()> {
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(Error::ControlExited);
        }
        Ok(())
    }

    fn listing(devices: &BTreeMap<String, String>) -> String {
        devices
            .iter()
            .map(|(address, name)| format!("Device {} {}\n", address, name))
            .collect()
    }
}

impl LocalDeviceControl for MockControl {
    async fn execute(&self, command: &str) -> Result<String> {
        let mut state = self.state();
        state.commands.push(command.to_string());
        Self::take_failure(&mut state)?;

        if state
            .rejected_prefixes
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            return Ok("Failed: org.bluez.Error.Failed".to_string());
        }

        let (verb, address) = command.split_once(' ').unwrap_or((command, ""));
        let address = canonical_address(address);
        let name = state
            .nearby
            .get(&address)
            .or_else(|| state.paired.get(&address))
            .cloned()
            .unwrap_or_default();

        let output = match verb {
            "pair" => {
                state.paired.insert(address.clone(), name);
                format!("Attempting to pair with {}\nPairing successful", address)
            }
            "trust" => format!("Changing {} trust succeeded", address),
            "untrust" => format!("Changing {} untrust succeeded", address),
            "connect" => {
                state.connected.insert(address.clone(), name);
                format!("Attempting to connect to {}\nConnection successful", address)
            }
            "disconnect" => {
                state.connected.remove(&address);
                format!("Attempting to disconnect from {}\nSuccessful disconnected", address)
            }
            "remove" => {
                state.connected.remove(&address);
                state.paired.remove(&address);
                "Device has been removed".to_string()
            }
            _ => String::new(),
        };

        Ok(output)
    }

    async fn query_devices(&self, class: DeviceClass) -> Result<String> {
        let mut state = self.state();
        state.queries.push(class);
        Self::take_failure(&mut state)?;

        let output = match class {
            DeviceClass::Connected => Self::listing(&state.connected),
            DeviceClass::Paired | DeviceClass::Trusted | DeviceClass::Bonded => {
                Self::listing(&state.paired)
            }
            DeviceClass::Unknown => {
                let mut all = state.nearby.clone();
                for (address, name) in &state.paired {
                    all.entry(address.clone()).or_insert_with(|| name.clone());
                }
                Self::listing(&all)
            }
        };

        Ok(output)
    }

    async fn restart(&self) -> Result<()> {
        self.state().restarts += 1;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.state().shutdowns += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluelink_core::parse_device_list;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    #[tokio::test]
    async fn test_connect_updates_connected_listing() {
        let mock = MockControl::new().with_paired(ADDR, "Headphones");

        mock.execute(&format!("connect {}", ADDR)).await.unwrap();

        let listing = mock.query_devices(DeviceClass::Connected).await.unwrap();
        let devices = parse_device_list(&listing, DeviceClass::Connected);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Headphones");
        assert!(mock.is_connected(ADDR));
    }

    #[tokio::test]
    async fn test_unfiltered_listing_merges_nearby_and_paired() {
        let mock = MockControl::new()
            .with_nearby("11:22:33:44:55:66", "Speaker")
            .with_paired(ADDR, "Headphones");

        let listing = mock.query_devices(DeviceClass::Unknown).await.unwrap();
        assert_eq!(parse_device_list(&listing, DeviceClass::Unknown).len(), 2);
    }

    #[tokio::test]
    async fn test_fail_next_counts_down() {
        let mock = MockControl::new();
        mock.fail_next(2);

        assert!(mock.execute("power on").await.is_err());
        assert!(mock.query_devices(DeviceClass::Paired).await.is_err());
        assert!(mock.execute("power on").await.is_ok());
        assert_eq!(mock.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_command() {
        let mock = MockControl::new();
        mock.reject("connect");

        let output = mock.execute(&format!("connect {}", ADDR)).await.unwrap();
        assert!(output.contains("org.bluez.Error"));
        assert!(!mock.is_connected(ADDR));
    }

    #[tokio::test]
    async fn test_restart_and_shutdown_counted() {
        let mock = MockControl::new();
        mock.restart().await.unwrap();
        mock.shutdown().await.unwrap();
        assert_eq!(mock.restarts(), 1);
        assert_eq!(mock.shutdowns(), 1);
    }
}
