//! Bluelink - Bluetooth discovery, pairing and auto-reconnect
//!
//! Entry points for the `bluelink` binary. The daemon claims the discovery
//! loop; every other command is a short-lived client that shares state with
//! the daemon through the shared store.

use std::fmt::Write as _;
use std::sync::Arc;

use bluelink_app::discovery::claim_discovery;
use bluelink_app::signals::shutdown_signal;
use bluelink_app::{
    DeviceManager, DeviceRequest, DiscoveryLoop, ExceptionRegistry, ListRequest, LoopState,
    ProcessHandle, Settings,
};
use bluelink_core::prelude::*;
use bluelink_core::store::{OpenMode, SharedStore, StoreSnapshot};
use bluelink_core::Device;
use bluelink_daemon::{CtlSession, LocalDeviceControl};

pub use bluelink_app::Claim;

/// Shown when the shared regions cannot be opened for lack of rights
pub const PERMISSION_HINT: &str =
    "Could not access shared data, please try running this with root.";

pub const NOT_ACTIVE: &str = "bluelink is not active";

/// A one-shot lifecycle command run by a client process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    List { class: Option<String> },
    Pair { address: String, name: Option<String> },
    Unpair { address: String, name: Option<String> },
    Connect { address: String, name: Option<String> },
    Disconnect { address: String, name: Option<String> },
}

/// User-facing hint for a failed store open.
fn open_hint(error: &Error) -> Option<&'static str> {
    if error.is_permission_denied() {
        Some(PERMISSION_HINT)
    } else {
        None
    }
}

fn open_store(settings: &Settings, mode: OpenMode) -> Result<SharedStore> {
    SharedStore::open(&settings.store.to_options(), mode).inspect_err(|e| {
        if let Some(hint) = open_hint(e) {
            eprintln!("{}", hint);
        }
    })
}

/// Tear the store down after a failed start when this process owns it: it
/// claimed discovery, or it created the regions and nobody claimed them since.
fn release_after_failed_start(store: &SharedStore, claimed: bool) {
    if claimed {
        store.teardown();
        return;
    }

    match store.discovery_active() {
        Ok(false) if store.created() => store.teardown(),
        Ok(_) => debug!("Shared state belongs to another process, leaving it"),
        Err(_) => {}
    }
}

async fn start_session(
    settings: &Settings,
    store: &SharedStore,
    claimed: bool,
) -> Result<CtlSession> {
    match CtlSession::start(settings.control.to_options()).await {
        Ok(session) => Ok(session),
        Err(e) => {
            critical!("Could not start the control session: {}", e);
            release_after_failed_start(store, claimed);
            Err(e)
        }
    }
}

/// Run the discovery daemon until a termination signal or until the shared
/// store is torn down. Returns `false` if another process already runs it.
///
/// Discovery is claimed before the control session starts, so the flag is
/// set for the whole startup replay.
pub async fn run_daemon(settings: &Settings) -> Result<bool> {
    let store = open_store(settings, OpenMode::AttachOrCreate)?;
    if claim_discovery(&store).context("Could not claim discovery")? == Claim::AlreadyRunning {
        println!("bluelink is already running");
        return Ok(false);
    }

    let session = start_session(settings, &store, true).await?;

    let manager = Arc::new(DeviceManager::new(
        Arc::new(session),
        Arc::new(store),
        settings.retry.to_policy(),
        ExceptionRegistry::new(settings.exceptions.retention()),
    ));

    let mut discovery =
        DiscoveryLoop::claimed(Arc::clone(&manager), settings.discovery.interval());

    println!("bluelink is active");
    let state = discovery.run(shutdown_signal()).await;
    debug_assert_eq!(state, LoopState::Stopped);

    if let Some(message) = manager.get_and_clear_exception(discovery.process()) {
        eprintln!("{}", message);
    }
    println!("bluelink stopped");
    Ok(true)
}

/// Render a store snapshot for `bluelink status`.
pub fn format_status(snapshot: &StoreSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "bluelink is active");
    let _ = writeln!(
        out,
        "Discovery: {}",
        if snapshot.discovery_active {
            "running"
        } else {
            "not running"
        }
    );
    let _ = writeln!(out, "Connected devices: {}", snapshot.connected.len());
    let _ = writeln!(
        out,
        "Manually disconnected devices: {}",
        snapshot.disconnected.len()
    );
    out
}

/// Print the shared state without creating it.
pub fn run_status(settings: &Settings) -> Result<bool> {
    let snapshot = match open_store(settings, OpenMode::AttachOnly).and_then(|s| s.snapshot()) {
        Ok(snapshot) => snapshot,
        Err(e) if e.is_store_unavailable() => {
            println!("{}", NOT_ACTIVE);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    print!("{}", format_status(&snapshot));
    Ok(true)
}

/// Tear the shared store down. A running daemon notices and exits.
pub fn run_stop(settings: &Settings) -> Result<bool> {
    let store = match open_store(settings, OpenMode::AttachOnly) {
        Ok(store) => store,
        Err(e) if e.is_store_unavailable() => {
            println!("{}", NOT_ACTIVE);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    if !store.is_available() {
        println!("{}", NOT_ACTIVE);
        return Ok(false);
    }

    store.teardown();
    println!("bluelink stopped");
    Ok(true)
}

/// Render a device listing, one `ADDRESS Name` line per device.
pub fn format_devices(devices: &[Device]) -> String {
    if devices.is_empty() {
        return "No devices found\n".to_string();
    }

    devices
        .iter()
        .map(|d| format!("{} {}\n", d.address, d.name))
        .collect()
}

fn device_request(process: ProcessHandle, address: &str, name: Option<&str>) -> DeviceRequest {
    let request = DeviceRequest::new(process, address);
    match name {
        Some(name) => request.with_name(name),
        None => request,
    }
}

/// Run one lifecycle operation against `manager` and print its result.
///
/// Returns `false` when the operation gave up; its message has then been
/// printed from the exception registry.
pub async fn execute_client<C: LocalDeviceControl>(
    manager: &DeviceManager<C>,
    command: &ClientCommand,
) -> bool {
    let process = manager.start_process();

    let succeeded = match command {
        ClientCommand::List { class } => {
            let request = match class {
                Some(class) => ListRequest::of_class(process, class),
                None => ListRequest::all(process),
            };
            manager
                .list_devices(request)
                .await
                .map(|devices| print!("{}", format_devices(&devices)))
                .is_some()
        }
        ClientCommand::Pair { address, name } => manager
            .pair(device_request(process, address, name.as_deref()))
            .await
            .map(|changed| {
                if changed {
                    println!("Paired with {}", address);
                } else {
                    println!("Already paired with {}", address);
                }
            })
            .is_some(),
        ClientCommand::Unpair { address, name } => manager
            .unpair(device_request(process, address, name.as_deref()))
            .await
            .map(|()| println!("Unpaired {}", address))
            .is_some(),
        ClientCommand::Connect { address, name } => manager
            .connect(device_request(process, address, name.as_deref()))
            .await
            .map(|changed| {
                if changed {
                    println!("Connected to {}", address);
                } else {
                    println!("Already connected to {}", address);
                }
            })
            .is_some(),
        ClientCommand::Disconnect { address, name } => manager
            .disconnect(device_request(process, address, name.as_deref()))
            .await
            .map(|changed| {
                if changed {
                    println!("Disconnected from {}", address);
                } else {
                    println!("Not connected to {}", address);
                }
            })
            .is_some(),
    };

    if let Some(message) = manager.get_and_clear_exception(process) {
        eprintln!("{}", message);
    }
    if manager.store_lost() {
        eprintln!("{}", NOT_ACTIVE);
    }

    succeeded
}

/// Open the store, start a control session and run `command` as a client.
/// A termination signal abandons the command; the store is left untouched.
pub async fn run_client(settings: &Settings, command: &ClientCommand) -> Result<bool> {
    let store = open_store(settings, OpenMode::AttachOrCreate)?;
    let session = start_session(settings, &store, false).await?;

    let manager = DeviceManager::new(
        Arc::new(session),
        Arc::new(store),
        settings.retry.to_policy(),
        ExceptionRegistry::new(settings.exceptions.retention()),
    );

    let succeeded = tokio::select! {
        succeeded = execute_client(&manager, command) => succeeded,
        _ = shutdown_signal() => {
            info!("Client interrupted");
            false
        }
    };

    manager.control().shutdown().await?;
    Ok(succeeded)
}
