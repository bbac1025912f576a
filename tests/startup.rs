//! Startup failures and who may release the shared store
//!
//! The control program is pointed at a name that cannot be found, so every
//! session start fails straight away.

use std::path::{Path, PathBuf};

use bluelink::{run_client, run_daemon, ClientCommand};
use bluelink_app::discovery::claim_discovery;
use bluelink_app::{Claim, Settings};
use bluelink_core::store::{OpenMode, SharedStore, DISCOVERY_REGION};
use tempfile::tempdir;

fn broken_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.store.directory = dir.to_path_buf();
    settings.control.program = PathBuf::from("bluelink-no-such-program");
    settings
}

fn list_all() -> ClientCommand {
    ClientCommand::List { class: None }
}

#[tokio::test]
async fn test_failed_client_leaves_daemon_store_alone() {
    let dir = tempdir().unwrap();
    let daemon = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();

    let result = run_client(&broken_settings(dir.path()), &list_all()).await;
    assert!(result.is_err());

    // The daemon had not claimed discovery yet, but it created the regions
    assert!(daemon.is_available());
    assert_eq!(claim_discovery(&daemon).unwrap(), Claim::Claimed);
}

#[tokio::test]
async fn test_failed_client_releases_store_it_created() {
    let dir = tempdir().unwrap();

    let result = run_client(&broken_settings(dir.path()), &list_all()).await;
    assert!(result.is_err());

    assert!(!dir.path().join(DISCOVERY_REGION).exists());
}

#[tokio::test]
async fn test_failed_client_never_touches_claimed_store() {
    let dir = tempdir().unwrap();
    let owner = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();
    claim_discovery(&owner).unwrap();

    let result = run_client(&broken_settings(dir.path()), &list_all()).await;
    assert!(result.is_err());

    assert!(owner.is_available());
    assert!(owner.discovery_active().unwrap());
}

#[tokio::test]
async fn test_daemon_defers_to_running_daemon() {
    let dir = tempdir().unwrap();
    let owner = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();
    claim_discovery(&owner).unwrap();

    // Refuses before starting a session, so the missing program is never hit
    let started = run_daemon(&broken_settings(dir.path())).await.unwrap();

    assert!(!started);
    assert!(owner.is_available());
    assert!(owner.discovery_active().unwrap());
}

#[tokio::test]
async fn test_daemon_releases_claimed_store_when_session_fails() {
    let dir = tempdir().unwrap();
    let shell = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();

    let result = run_daemon(&broken_settings(dir.path())).await;
    assert!(result.is_err());

    assert!(!dir.path().join(DISCOVERY_REGION).exists());
    assert!(!shell.is_available());
}
