//! Device lifecycle manager
//!
//! Combines control-channel queries and commands with shared-store updates.
//! Every public operation runs through [`Resilience`], so callers receive
//! `Option`s and fetch failures with [`DeviceManager::get_and_clear_exception`].

use std::sync::Arc;

use bluelink_core::prelude::*;
use bluelink_core::store::{SetKey, SharedStore};
use bluelink_core::{
    contains_address, parse_device_list, validate_address, Device, DeviceClass, DeviceKey,
};
use bluelink_daemon::{ensure_accepted, LocalDeviceControl};

use crate::exceptions::{ExceptionRegistry, Operation, ProcessCounter, ProcessHandle};
use crate::requests::{AutoConnectRequest, DeviceRequest, ListRequest, ProcessRequest};
use crate::retry::{Resilience, RetryPolicy};

/// Orchestrates pairing, connection and listing for one process.
pub struct DeviceManager<C> {
    control: Arc<C>,
    store: Arc<SharedStore>,
    resilience: Resilience,
    processes: ProcessCounter,
}

impl<C: LocalDeviceControl> DeviceManager<C> {
    pub fn new(
        control: Arc<C>,
        store: Arc<SharedStore>,
        policy: RetryPolicy,
        exceptions: ExceptionRegistry,
    ) -> Self {
        Self {
            control,
            store,
            resilience: Resilience::new(policy, exceptions),
            processes: ProcessCounter::new(),
        }
    }

    pub fn control(&self) -> &Arc<C> {
        &self.control
    }

    pub fn store(&self) -> &Arc<SharedStore> {
        &self.store
    }

    /// Obtain a handle for correlating failures with this caller.
    pub fn start_process(&self) -> ProcessHandle {
        self.processes.next()
    }

    /// The parked failure message for `process`, cleared on read.
    pub fn get_and_clear_exception(&self, process: ProcessHandle) -> Option<String> {
        self.resilience.exceptions().take(process)
    }

    /// Whether an operation found the shared store torn down.
    pub fn store_lost(&self) -> bool {
        self.resilience.store_lost()
    }

    // ─────────────────────────────────────────────────────────────
    // Wrapped operations
    // ─────────────────────────────────────────────────────────────

    /// Pair and trust a device. `Some(false)` if it was already paired.
    pub async fn pair(&self, request: DeviceRequest) -> Option<bool> {
        self.resilience
            .run(self.control.as_ref(), Operation::Pair, request, |req| {
                self.pair_once(req)
            })
            .await
    }

    /// Remove and untrust a device, without checking whether it is paired.
    pub async fn unpair(&self, request: DeviceRequest) -> Option<()> {
        self.resilience
            .run(self.control.as_ref(), Operation::Unpair, request, |req| {
                self.unpair_once(req)
            })
            .await
    }

    /// Pair if needed, connect, and record the device as connected.
    /// `Some(false)` if it was already connected.
    pub async fn connect(&self, request: DeviceRequest) -> Option<bool> {
        self.resilience
            .run(self.control.as_ref(), Operation::Connect, request, |req| {
                self.connect_once(req)
            })
            .await
    }

    /// Disconnect a device and mark it as manually disconnected so
    /// auto-connect leaves it alone. `Some(false)` if it was not connected.
    pub async fn disconnect(&self, request: DeviceRequest) -> Option<bool> {
        self.resilience
            .run(self.control.as_ref(), Operation::Disconnect, request, |req| {
                self.disconnect_once(req)
            })
            .await
    }

    /// Connect discovered, paired devices that are neither tracked as
    /// connected nor manually disconnected. Returns how many were connected.
    pub async fn auto_connect(&self, request: AutoConnectRequest) -> Option<usize> {
        self.resilience
            .run(self.control.as_ref(), Operation::AutoConnect, request, |req| {
                self.auto_connect_once(req)
            })
            .await
    }

    pub async fn list_devices(&self, request: ListRequest) -> Option<Vec<Device>> {
        self.resilience
            .run(self.control.as_ref(), Operation::ListDevices, request, |req| {
                self.list_once(req)
            })
            .await
    }

    /// One discovery pass: list every nearby device, then auto-connect.
    pub async fn discover(&self, process: ProcessHandle) -> Option<usize> {
        self.resilience
            .run(
                self.control.as_ref(),
                Operation::Discovery,
                ProcessRequest { process },
                |req| self.discover_once(req),
            )
            .await
    }

    // ─────────────────────────────────────────────────────────────
    // Single attempts
    // ─────────────────────────────────────────────────────────────

    async fn query(&self, class: DeviceClass) -> Result<Vec<Device>> {
        let output = self.control.query_devices(class).await?;
        Ok(parse_device_list(&output, class))
    }

    async fn command(&self, verb: &str, address: &str) -> Result<String> {
        let command = format!("{} {}", verb, address);
        let output = self.control.execute(&command).await?;
        ensure_accepted(&command, output)
    }

    async fn pair_once(&self, request: DeviceRequest) -> Result<bool> {
        let address = validate_address(&request.address)?;

        let paired = self.query(DeviceClass::Paired).await?;
        if contains_address(&paired, &address) {
            debug!("Already paired with {}", address);
            return Ok(false);
        }

        self.command("pair", &address).await?;
        self.command("trust", &address).await?;

        info!("Paired with device {}", request.describe());
        Ok(true)
    }

    async fn unpair_once(&self, request: DeviceRequest) -> Result<()> {
        let address = validate_address(&request.address)?;

        let removed = self.control.execute(&format!("remove {}", address)).await?;
        trace!("remove {}: {}", address, removed);
        let untrusted = self.control.execute(&format!("untrust {}", address)).await?;
        trace!("untrust {}: {}", address, untrusted);

        info!("Unpaired from device {}", request.describe());
        Ok(())
    }

    async fn connect_once(&self, request: DeviceRequest) -> Result<bool> {
        let address = validate_address(&request.address)?;

        let connected = self.query(DeviceClass::Connected).await?;
        if contains_address(&connected, &address) {
            debug!("Already connected to {}", address);
            return Ok(false);
        }

        let pair_request = DeviceRequest {
            address: address.clone(),
            ..request.clone()
        };
        self.pair_once(pair_request).await?;
        self.command("connect", &address).await?;

        // connect leaves the manual-disconnect mark in place
        self.store
            .add_member(SetKey::Connected, DeviceKey::from_address(&address))?;

        info!("Connected to device {}", request.describe());
        Ok(true)
    }

    async fn disconnect_once(&self, request: DeviceRequest) -> Result<bool> {
        let address = validate_address(&request.address)?;

        let connected = self.query(DeviceClass::Connected).await?;
        if !contains_address(&connected, &address) {
            debug!("Not connected to {}", address);
            return Ok(false);
        }

        self.command("disconnect", &address).await?;

        let key = DeviceKey::from_address(&address);
        self.store.remove_member(SetKey::Connected, key)?;
        self.store.add_member(SetKey::Disconnected, key)?;

        info!("Disconnected from device {}", request.describe());
        Ok(true)
    }

    async fn auto_connect_once(&self, request: AutoConnectRequest) -> Result<usize> {
        if request.devices.is_empty() {
            return Ok(0);
        }

        let paired = self.query(DeviceClass::Paired).await?;
        let connected = self.store.members(SetKey::Connected)?;
        let disconnected = self.store.members(SetKey::Disconnected)?;

        let mut count = 0;
        for device in &request.devices {
            let key = device.key();
            if connected.contains(&key) || disconnected.contains(&key) {
                trace!("Skipping {}: tracked by shared state", device.address);
                continue;
            }
            if !contains_address(&paired, &device.address) {
                continue;
            }

            let mut connect_request = DeviceRequest::new(request.process, &device.address);
            if !device.name.is_empty() {
                connect_request = connect_request.with_name(&device.name);
            }
            if self.connect_once(connect_request).await? {
                count += 1;
            }
        }

        if count > 0 {
            info!("Auto-connected {} device(s)", count);
        }
        Ok(count)
    }

    async fn list_once(&self, request: ListRequest) -> Result<Vec<Device>> {
        let class = request.device_class()?;
        self.query(class).await
    }

    async fn discover_once(&self, request: ProcessRequest) -> Result<usize> {
        let devices = self.query(DeviceClass::Unknown).await?;
        debug!("Discovered {} device(s)", devices.len());

        self.auto_connect_once(AutoConnectRequest {
            process: request.process,
            devices,
        })
        .await
    }
}
