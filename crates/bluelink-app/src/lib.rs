//! bluelink-app - Device lifecycle orchestration for Bluelink
//!
//! This crate combines the control channel with the shared state store: the
//! lifecycle manager and its retry wrapper, the per-process exception
//! registry, the discovery loop, settings loading and signal handling.

pub mod config;
pub mod discovery;
pub mod exceptions;
pub mod manager;
pub mod requests;
pub mod retry;
pub mod signals;

// Re-export primary types
pub use config::{load_settings, Settings};
pub use discovery::{Claim, DiscoveryLoop, LoopState};
pub use exceptions::{ExceptionRegistry, Operation, ProcessHandle};
pub use manager::DeviceManager;
pub use requests::{AutoConnectRequest, DeviceRequest, ListRequest, Sanitize};
pub use retry::{Resilience, RetryPolicy};
