//! Device lifecycle across processes sharing one store
//!
//! A "daemon" and a "shell" each get their own store handle on the same
//! directory and their own manager, both driving one scripted adapter.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bluelink::{execute_client, ClientCommand};
use bluelink_app::{
    DeviceManager, DeviceRequest, ExceptionRegistry, ListRequest, ProcessHandle, RetryPolicy,
};
use bluelink_core::store::{OpenMode, SetKey, SharedStore};
use bluelink_core::{DeviceClass, DeviceKey};
use bluelink_daemon::test_utils::MockControl;
use tempfile::tempdir;

const HEADPHONES: &str = "AA:BB:CC:DD:EE:FF";
const SPEAKER: &str = "11:22:33:44:55:66";
const KEYBOARD: &str = "22:33:44:55:66:77";

fn manager(dir: &Path, control: &Arc<MockControl>) -> DeviceManager<MockControl> {
    let store = SharedStore::open_in(dir, OpenMode::AttachOrCreate).unwrap();
    DeviceManager::new(
        Arc::clone(control),
        Arc::new(store),
        RetryPolicy::default(),
        ExceptionRegistry::default(),
    )
}

fn connect(address: &str) -> ClientCommand {
    ClientCommand::Connect {
        address: address.to_string(),
        name: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_discovery_reconnects_paired_devices() {
    let dir = tempdir().unwrap();
    let control = Arc::new(
        MockControl::new()
            .with_paired(HEADPHONES, "Headphones")
            .with_nearby(SPEAKER, "Speaker"),
    );
    let daemon = manager(dir.path(), &control);

    let process = daemon.start_process();
    assert_eq!(daemon.discover(process).await, Some(1));

    assert!(control.is_connected(HEADPHONES));
    assert!(!control.is_connected(SPEAKER), "unpaired devices are left alone");
    assert!(daemon
        .store()
        .contains(SetKey::Connected, DeviceKey::from_address(HEADPHONES))
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_survives_discovery() {
    let dir = tempdir().unwrap();
    let control = Arc::new(MockControl::new().with_paired(HEADPHONES, "Headphones"));
    let daemon = manager(dir.path(), &control);
    let shell = manager(dir.path(), &control);

    let process = daemon.start_process();
    assert_eq!(daemon.discover(process).await, Some(1));

    assert!(execute_client(&shell, &ClientCommand::Disconnect {
        address: HEADPHONES.to_string(),
        name: Some("Headphones".to_string()),
    })
    .await);
    assert!(!control.is_connected(HEADPHONES));

    // The daemon sees the shell's mark and does not reconnect
    assert_eq!(daemon.discover(process).await, Some(0));
    assert!(!control.is_connected(HEADPHONES));

    let snapshot = daemon.store().snapshot().unwrap();
    assert!(snapshot.connected.is_empty());
    assert!(snapshot
        .disconnected
        .contains(&DeviceKey::from_address(HEADPHONES)));
}

#[tokio::test(start_paused = true)]
async fn test_client_connect_pairs_first() {
    let dir = tempdir().unwrap();
    let control = Arc::new(MockControl::new().with_nearby(KEYBOARD, "Keyboard"));
    let shell = manager(dir.path(), &control);

    assert!(execute_client(&shell, &connect(KEYBOARD)).await);

    assert!(control.is_paired(KEYBOARD));
    assert!(control.is_connected(KEYBOARD));
    assert_eq!(
        control.commands(),
        vec![
            format!("pair {}", KEYBOARD),
            format!("trust {}", KEYBOARD),
            format!("connect {}", KEYBOARD),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover_after_restart() {
    let dir = tempdir().unwrap();
    let control = Arc::new(MockControl::new().with_paired(HEADPHONES, "Headphones"));
    let shell = manager(dir.path(), &control);

    control.fail_next(2);
    let started = tokio::time::Instant::now();

    assert!(execute_client(&shell, &connect(HEADPHONES)).await);

    assert!(control.is_connected(HEADPHONES));
    assert_eq!(control.restarts(), 1);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(shell.get_and_clear_exception(ProcessHandle::from_raw(0)), None);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_gives_up() {
    let dir = tempdir().unwrap();
    let control = Arc::new(MockControl::new().with_nearby(SPEAKER, "Speaker"));
    control.reject("pair");
    let shell = manager(dir.path(), &control);

    assert!(!execute_client(&shell, &connect(SPEAKER)).await);

    let pairs = control
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("pair"))
        .count();
    assert_eq!(pairs, 3);
    assert_eq!(control.restarts(), 1);
    assert!(!control.is_connected(SPEAKER));
    assert!(shell
        .store()
        .members(SetKey::Connected)
        .unwrap()
        .is_empty());

    // The client already consumed the parked message
    assert_eq!(shell.get_and_clear_exception(ProcessHandle::from_raw(0)), None);
}

#[tokio::test(start_paused = true)]
async fn test_failure_message_is_per_process() {
    let dir = tempdir().unwrap();
    let control = Arc::new(MockControl::new().with_nearby(SPEAKER, "Speaker"));
    control.reject("pair");
    let shell = manager(dir.path(), &control);

    let failing = shell.start_process();
    let other = shell.start_process();
    assert_eq!(
        shell.pair(DeviceRequest::new(failing, SPEAKER)).await,
        None
    );

    assert_eq!(shell.get_and_clear_exception(other), None);
    assert_eq!(
        shell.get_and_clear_exception(failing).as_deref(),
        Some("Something went wrong while attempting to pair with a device.")
    );
    assert_eq!(shell.get_and_clear_exception(failing), None);
}

#[tokio::test]
async fn test_list_paired_devices() {
    let dir = tempdir().unwrap();
    let control = Arc::new(
        MockControl::new()
            .with_paired(HEADPHONES, "My Headphones")
            .with_paired(SPEAKER, "Speaker")
            .with_nearby(KEYBOARD, "Keyboard"),
    );
    let shell = manager(dir.path(), &control);
    let process = shell.start_process();

    let devices = shell
        .list_devices(ListRequest::of_class(process, "paired"))
        .await
        .unwrap();

    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| d.class == DeviceClass::Paired));
    let headphones = devices.iter().find(|d| d.address == HEADPHONES).unwrap();
    assert_eq!(headphones.name, "My Headphones");
    assert_eq!(control.queries(), vec![DeviceClass::Paired]);

    assert!(execute_client(&shell, &ClientCommand::List { class: None }).await);
    assert_eq!(control.queries().last(), Some(&DeviceClass::Unknown));
}

#[tokio::test]
async fn test_stopped_store_is_reported_to_clients() {
    let dir = tempdir().unwrap();
    let control = Arc::new(MockControl::new().with_paired(HEADPHONES, "Headphones"));
    let shell = manager(dir.path(), &control);

    SharedStore::open_in(dir.path(), OpenMode::AttachOnly)
        .unwrap()
        .teardown();

    assert!(!execute_client(&shell, &connect(HEADPHONES)).await);
    assert!(shell.store_lost());
    assert_eq!(control.restarts(), 0, "store loss is not retried");
}
