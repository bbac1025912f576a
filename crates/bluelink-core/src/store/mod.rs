//! Cross-process shared state
//!
//! Three named regions hold the state every Bluelink process agrees on:
//! whether some process owns the discovery loop, which devices are believed
//! connected, and which the user disconnected by hand.
//!
//! ## Concurrency
//!
//! There is no cross-process lock. [`SharedStore::add_member`] and
//! [`SharedStore::remove_member`] are read-modify-write cycles, so two
//! processes updating the same set at the same time can lose one update
//! (last writer wins). The workload (one discovery loop, an occasional shell)
//! makes this rare; `tests/shared_store.rs` pins the behaviour down.
//!
//! ## Teardown
//!
//! [`SharedStore::teardown`] zeroes every region before unlinking it. Handles
//! in other processes keep the old pages mapped, read the zero sentinel and
//! report [`Error::StoreUnavailable`] from then on.

pub mod layout;
pub mod region;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::device::DeviceKey;
use crate::error::{Error, Result};
pub use region::OpenMode;
use region::Region;

pub const DISCOVERY_REGION: &str = "BLUELINK-DISCOVERY-STATE";
pub const CONNECTED_REGION: &str = "BLUELINK-CONNECTED-DEVICES";
pub const DISCONNECTED_REGION: &str = "BLUELINK-MANUALLY-DISCONNECTED-DEVICES";

/// Size of the discovery flag region
pub const FLAG_CAPACITY: usize = 1;

/// Default size of each device-set region
pub const SET_CAPACITY: usize = 256;

/// Default directory backing the regions
pub const DEFAULT_STORE_DIR: &str = "/dev/shm";

/// Where the regions live and how large the device sets are.
///
/// Every process attaching to the same store must use identical options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub directory: PathBuf,
    pub set_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_STORE_DIR),
            set_capacity: SET_CAPACITY,
        }
    }
}

impl StoreOptions {
    pub fn in_dir(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}

/// The two shared device sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKey {
    Connected,
    Disconnected,
}

/// Any of the three shared values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKey {
    Discovery,
    Connected,
    Disconnected,
}

impl From<SetKey> for StoreKey {
    fn from(key: SetKey) -> Self {
        match key {
            SetKey::Connected => StoreKey::Connected,
            SetKey::Disconnected => StoreKey::Disconnected,
        }
    }
}

/// Value read by [`SharedStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Discovery(bool),
    Devices(BTreeSet<DeviceKey>),
}

/// Point-in-time copy of all three values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreSnapshot {
    pub discovery_active: bool,
    pub connected: BTreeSet<DeviceKey>,
    pub disconnected: BTreeSet<DeviceKey>,
}

/// Handle on the three shared regions.
pub struct SharedStore {
    discovery: Region,
    connected: Region,
    disconnected: Region,
    created: bool,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("created", &self.created)
            .field("torn_down", &self.torn_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SharedStore {
    /// Attach to the regions, creating missing ones when `mode` allows.
    ///
    /// # Errors
    /// - [`Error::PermissionDenied`] if the caller may not open a region
    /// - [`Error::StoreUnavailable`] in `AttachOnly` mode when a region is missing
    pub fn open(options: &StoreOptions, mode: OpenMode) -> Result<Self> {
        let dir = options.directory.as_path();
        let empty_set =
            layout::encode_set(CONNECTED_REGION, &BTreeSet::new(), options.set_capacity)?;

        let (discovery, created_flag) = Region::open(
            dir,
            DISCOVERY_REGION,
            FLAG_CAPACITY,
            mode,
            &layout::encode_flag(false),
        )?;
        let (connected, created_connected) =
            Region::open(dir, CONNECTED_REGION, options.set_capacity, mode, &empty_set)?;
        let (disconnected, created_disconnected) = Region::open(
            dir,
            DISCONNECTED_REGION,
            options.set_capacity,
            mode,
            &empty_set,
        )?;

        let created = created_flag || created_connected || created_disconnected;
        if created {
            info!("Created shared state in {}", dir.display());
        } else {
            debug!("Attached to shared state in {}", dir.display());
        }

        Ok(Self {
            discovery,
            connected,
            disconnected,
            created,
            torn_down: AtomicBool::new(false),
        })
    }

    /// Convenience for [`SharedStore::open`] with default sizing in `dir`.
    pub fn open_in(dir: &Path, mode: OpenMode) -> Result<Self> {
        Self::open(&StoreOptions::in_dir(dir), mode)
    }

    /// Whether this handle created at least one region.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Largest number of keys a device set can hold.
    pub fn max_members(&self) -> usize {
        layout::max_members(self.connected.capacity())
    }

    /// Check the liveness sentinel (first byte of the connected-set region).
    pub fn ensure_live(&self) -> Result<()> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(Error::StoreUnavailable);
        }
        match self.connected.first_byte()? {
            0 => Err(Error::StoreUnavailable),
            _ => Ok(()),
        }
    }

    /// `true` unless the store has been torn down by any process.
    pub fn is_available(&self) -> bool {
        self.ensure_live().is_ok()
    }

    pub fn get(&self, key: StoreKey) -> Result<StoreValue> {
        match key {
            StoreKey::Discovery => self.discovery_active().map(StoreValue::Discovery),
            StoreKey::Connected => self.members(SetKey::Connected).map(StoreValue::Devices),
            StoreKey::Disconnected => self.members(SetKey::Disconnected).map(StoreValue::Devices),
        }
    }

    pub fn discovery_active(&self) -> Result<bool> {
        self.ensure_live()?;
        let byte = self.discovery.first_byte()?;
        Ok(layout::decode_flag(byte))
    }

    pub fn set_discovery(&self, active: bool) -> Result<()> {
        self.ensure_live()?;
        self.discovery.write(&layout::encode_flag(active))?;
        debug!("Discovery flag set to {}", active);
        Ok(())
    }

    pub fn members(&self, set: SetKey) -> Result<BTreeSet<DeviceKey>> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(Error::StoreUnavailable);
        }
        let region = self.region(set);
        let buf = region.read()?;
        layout::decode_set(region.name(), &buf)
    }

    pub fn contains(&self, set: SetKey, key: DeviceKey) -> Result<bool> {
        Ok(self.members(set)?.contains(&key))
    }

    /// Overwrite a whole set. No merge with concurrent writers.
    pub fn replace_members(&self, set: SetKey, members: &BTreeSet<DeviceKey>) -> Result<()> {
        self.ensure_live()?;
        let region = self.region(set);
        let buf = layout::encode_set(region.name(), members, region.capacity())?;
        region.write(&buf)
    }

    /// Add `key` to `set`. Returns `false` if it was already present.
    pub fn add_member(&self, set: SetKey, key: DeviceKey) -> Result<bool> {
        let mut members = self.members(set)?;
        if !members.insert(key) {
            return Ok(false);
        }
        self.replace_members(set, &members)?;
        debug!("Added {} to {:?}", key, set);
        Ok(true)
    }

    /// Remove `key` from `set`. Returns `false` if it was absent.
    pub fn remove_member(&self, set: SetKey, key: DeviceKey) -> Result<bool> {
        let mut members = self.members(set)?;
        if !members.remove(&key) {
            return Ok(false);
        }
        self.replace_members(set, &members)?;
        debug!("Removed {} from {:?}", key, set);
        Ok(true)
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        Ok(StoreSnapshot {
            discovery_active: self.discovery_active()?,
            connected: self.members(SetKey::Connected)?,
            disconnected: self.members(SetKey::Disconnected)?,
        })
    }

    /// Zero every region, then release it. Safe to call repeatedly and from
    /// a handle whose regions were already released elsewhere.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            debug!("Shared state already torn down by this handle");
            return;
        }

        for region in [&self.discovery, &self.connected, &self.disconnected] {
            if let Err(e) = region.zero() {
                warn!("Failed to zero shared region {}: {}", region.name(), e);
            }
            let _ = region.unlink();
        }

        info!("Shared state torn down");
    }

    fn region(&self, set: SetKey) -> &Region {
        match set {
            SetKey::Connected => &self.connected,
            SetKey::Disconnected => &self.disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(address: &str) -> DeviceKey {
        DeviceKey::from_address(address)
    }

    #[test]
    fn test_fresh_store_defaults() {
        let dir = tempdir().unwrap();
        let store = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();

        assert!(store.created());
        assert_eq!(store.get(StoreKey::Discovery).unwrap(), StoreValue::Discovery(false));
        assert_eq!(
            store.get(StoreKey::Connected).unwrap(),
            StoreValue::Devices(BTreeSet::new())
        );
        assert!(store.members(SetKey::Disconnected).unwrap().is_empty());
    }

    #[test]
    fn test_second_open_attaches() {
        let dir = tempdir().unwrap();
        let a = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();
        a.set_discovery(true).unwrap();

        let b = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();
        assert!(!b.created());
        assert!(b.discovery_active().unwrap());
    }

    #[test]
    fn test_attach_only_without_store() {
        let dir = tempdir().unwrap();
        let result = SharedStore::open_in(dir.path(), OpenMode::AttachOnly);
        assert!(result.unwrap_err().is_store_unavailable());
    }

    #[test]
    fn test_add_and_remove_members() {
        let dir = tempdir().unwrap();
        let store = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();
        let k = key("AA:BB:CC:DD:EE:FF");

        assert!(store.add_member(SetKey::Connected, k).unwrap());
        assert!(store.contains(SetKey::Connected, k).unwrap());
        assert!(!store.add_member(SetKey::Connected, k).unwrap());
        assert_eq!(store.members(SetKey::Connected).unwrap().len(), 1);

        assert!(store.remove_member(SetKey::Connected, k).unwrap());
        assert!(!store.contains(SetKey::Connected, k).unwrap());
    }

    #[test]
    fn test_empty_set_operations_are_noops() {
        let dir = tempdir().unwrap();
        let store = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();

        assert!(!store
            .remove_member(SetKey::Disconnected, key("AA:BB:CC:DD:EE:FF"))
            .unwrap());
        assert!(store.members(SetKey::Disconnected).unwrap().is_empty());
    }

    #[test]
    fn test_sets_are_independent() {
        let dir = tempdir().unwrap();
        let store = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();
        let k = key("AA:BB:CC:DD:EE:FF");

        store.add_member(SetKey::Disconnected, k).unwrap();
        assert!(!store.contains(SetKey::Connected, k).unwrap());
        assert!(store.contains(SetKey::Disconnected, k).unwrap());
    }

    #[test]
    fn test_capacity_overflow() {
        let dir = tempdir().unwrap();
        let options = StoreOptions {
            directory: dir.path().to_path_buf(),
            set_capacity: 12, // two keys
        };
        let store = SharedStore::open(&options, OpenMode::AttachOrCreate).unwrap();
        assert_eq!(store.max_members(), 2);

        store.add_member(SetKey::Connected, DeviceKey::from_raw(1)).unwrap();
        store.add_member(SetKey::Connected, DeviceKey::from_raw(2)).unwrap();
        let err = store
            .add_member(SetKey::Connected, DeviceKey::from_raw(3))
            .unwrap_err();
        assert!(matches!(err, Error::CapacityOverflow { .. }));

        // Nothing was truncated
        assert_eq!(store.members(SetKey::Connected).unwrap().len(), 2);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();

        store.teardown();
        store.teardown();

        assert!(!store.is_available());
        assert!(store.get(StoreKey::Discovery).unwrap_err().is_store_unavailable());
        assert!(store.get(StoreKey::Connected).unwrap_err().is_store_unavailable());
        assert!(store
            .add_member(SetKey::Disconnected, DeviceKey::from_raw(1))
            .unwrap_err()
            .is_store_unavailable());
        assert!(!dir.path().join(CONNECTED_REGION).exists());
    }

    #[test]
    fn test_teardown_observed_by_other_handle() {
        let dir = tempdir().unwrap();
        let owner = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();
        let client = SharedStore::open_in(dir.path(), OpenMode::AttachOnly).unwrap();
        assert!(client.is_available());

        owner.teardown();

        assert!(!client.is_available());
        assert!(client.discovery_active().unwrap_err().is_store_unavailable());
        assert!(client
            .members(SetKey::Connected)
            .unwrap_err()
            .is_store_unavailable());
        assert!(client.set_discovery(true).unwrap_err().is_store_unavailable());

        // The client may tear down too without raising
        client.teardown();
    }

    #[test]
    fn test_snapshot() {
        let dir = tempdir().unwrap();
        let store = SharedStore::open_in(dir.path(), OpenMode::AttachOrCreate).unwrap();
        store.set_discovery(true).unwrap();
        store.add_member(SetKey::Connected, DeviceKey::from_raw(7)).unwrap();

        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.discovery_active);
        assert_eq!(snapshot.connected.len(), 1);
        assert!(snapshot.disconnected.is_empty());
    }
}
