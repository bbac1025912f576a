//! Per-process exception registry
//!
//! When a wrapped operation gives up, the failure is parked here under the
//! caller's [`ProcessHandle`] so the caller can fetch a human-readable message
//! once. Unclaimed records expire after the retention period.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local};

use bluelink_core::prelude::*;

/// Default lifetime of an unclaimed record
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

/// Caller identity used to correlate failures with the caller that hit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessHandle(i64);

impl ProcessHandle {
    /// Sentinel for callers that never obtained a handle
    pub const UNASSIGNED: ProcessHandle = ProcessHandle(-1);

    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn is_assigned(self) -> bool {
        self.0 >= 0
    }
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out increasing [`ProcessHandle`]s starting at 0.
#[derive(Debug, Default)]
pub struct ProcessCounter(AtomicI64);

impl ProcessCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ProcessHandle {
        ProcessHandle(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle operations, used to phrase failures for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Pair,
    Unpair,
    Connect,
    Disconnect,
    AutoConnect,
    ListDevices,
    Discovery,
}

impl Operation {
    /// What the operation was doing, completing "Something went wrong while ..."
    pub fn activity(self) -> &'static str {
        match self {
            Operation::Pair => "attempting to pair with a device.",
            Operation::Unpair => "attempting to unpair a device.",
            Operation::Connect => "attempting to connect with a device.",
            Operation::Disconnect => "attempting to disconnect from a device.",
            Operation::AutoConnect => "attempting to auto-connect to known devices.",
            Operation::ListDevices => "getting the nearby devices.",
            Operation::Discovery => "scanning for new devices in a loop.",
        }
    }

    pub fn failure_message(self) -> String {
        format!("Something went wrong while {}", self.activity())
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Pair => "pair",
            Operation::Unpair => "unpair",
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::AutoConnect => "auto_connect",
            Operation::ListDevices => "list_devices",
            Operation::Discovery => "discovery",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure parked for a process.
#[derive(Debug, Clone)]
pub struct ExceptionRecord {
    pub operation: Operation,
    pub message: String,
    pub recorded_at: DateTime<Local>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Inner {
    records: Mutex<HashMap<ProcessHandle, ExceptionRecord>>,
    generation: AtomicU64,
}

/// Shared registry of [`ExceptionRecord`]s, at most one per process.
///
/// Cloning is cheap and clones share the same records.
#[derive(Debug, Clone)]
pub struct ExceptionRegistry {
    inner: Arc<Inner>,
    retention: Duration,
}

impl Default for ExceptionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl ExceptionRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            retention,
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ProcessHandle, ExceptionRecord>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Record `operation` as failed for `process`, replacing any earlier
    /// record, and schedule its expiry.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn record(&self, process: ProcessHandle, operation: Operation) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let record = ExceptionRecord {
            operation,
            message: operation.failure_message(),
            recorded_at: Local::now(),
            generation,
        };

        debug!(
            "Recording exception for process {}: {} at {}",
            process,
            record.message,
            record.recorded_at.format("%H:%M:%S")
        );
        self.records().insert(process, record);

        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.retention).await;
            registry.expire(process, generation);
        });
    }

    /// Drop the record for `process` if it is still the one with `generation`.
    fn expire(&self, process: ProcessHandle, generation: u64) {
        let mut records = self.records();
        if records
            .get(&process)
            .is_some_and(|record| record.generation == generation)
        {
            records.remove(&process);
            trace!("Exception for process {} expired", process);
        }
    }

    /// Return and clear the message for `process`.
    pub fn take(&self, process: ProcessHandle) -> Option<String> {
        self.records().remove(&process).map(|record| record.message)
    }

    pub fn peek(&self, process: ProcessHandle) -> Option<ExceptionRecord> {
        self.records().get(&process).cloned()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}
