//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Device Control Channel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Control program not found: {program}. Is BlueZ installed?")]
    ControlNotFound { program: String },

    #[error("Failed to start control session: {reason}")]
    ControlSpawn { reason: String },

    #[error("Control session exited unexpectedly")]
    ControlExited,

    #[error("Control command timed out: {command}")]
    CommandTimeout { command: String },

    #[error("Control command rejected: {command}: {output}")]
    CommandRejected { command: String, output: String },

    #[error("Device query error: {message}")]
    Query { message: String },

    // ─────────────────────────────────────────────────────────────
    // Shared State Store Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Shared state is unavailable (torn down or not created)")]
    StoreUnavailable,

    #[error("Permission denied for shared region: {region}")]
    PermissionDenied { region: String },

    #[error("Shared region {region} overflow: {needed} bytes needed, capacity is {capacity}")]
    CapacityOverflow {
        region: String,
        needed: usize,
        capacity: usize,
    },

    #[error("Shared region {region} is corrupt: {message}")]
    CorruptRegion { region: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Argument Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument { name: &'static str, message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn control_spawn(reason: impl Into<String>) -> Self {
        Self::ControlSpawn {
            reason: reason.into(),
        }
    }

    pub fn command_timeout(command: impl Into<String>) -> Self {
        Self::CommandTimeout {
            command: command.into(),
        }
    }

    pub fn command_rejected(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::CommandRejected {
            command: command.into(),
            output: output.into(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn permission_denied(region: impl Into<String>) -> Self {
        Self::PermissionDenied {
            region: region.into(),
        }
    }

    pub fn corrupt_region(region: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptRegion {
            region: region.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The shared store was torn down (or never created); observers must shut down.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are worth retrying, possibly after restarting the
    /// control session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ControlExited
                | Error::CommandTimeout { .. }
                | Error::CommandRejected { .. }
                | Error::Query { .. }
                | Error::InvalidArgument { .. }
        )
    }

    /// Check if this error should trigger process exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ControlNotFound { .. }
                | Error::ControlSpawn { .. }
                | Error::StoreUnavailable
                | Error::PermissionDenied { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
