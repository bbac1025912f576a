//! # bluelink-core - Core Domain Types
//!
//! Foundation crate for Bluelink. Provides device types, error handling,
//! logging setup and the cross-process shared state store.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (thiserror, regex, tracing). The store targets Linux, where the
//! regions live in `/dev/shm`.
//!
//! ## Public API
//!
//! ### Devices (`device`)
//! - [`Device`] - A device reported by one query of the control interpreter
//! - [`DeviceClass`] - `paired`, `trusted`, `bonded`, `connected` query filters
//! - [`DeviceKey`] - 32-bit FNV-1a digest of an address, stored in shared sets
//! - [`parse_device_list()`] - Parse `devices` output into [`Device`]s
//!
//! ### Shared State (`store`)
//! - [`SharedStore`] - Discovery flag plus connected / manually-disconnected sets
//! - [`OpenMode`] - Attach-or-create (daemon, shells) vs attach-only (status)
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use bluelink_core::prelude::*;
//! ```

pub mod ansi;
pub mod device;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod store;

// Re-export commonly used types at crate root for convenience
pub use ansi::{clean_line, strip_ansi_codes};
pub use device::{
    canonical_address, contains_address, is_valid_address, parse_device_list, validate_address,
    Device, DeviceClass, DeviceKey,
};
pub use error::{Error, Result, ResultExt};
pub use store::{
    OpenMode, SetKey, SharedStore, StoreKey, StoreOptions, StoreSnapshot, StoreValue,
    CONNECTED_REGION, DISCONNECTED_REGION, DISCOVERY_REGION, SET_CAPACITY,
};
