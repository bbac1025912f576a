//! Device control channel abstraction
//!
//! The lifecycle manager talks to the Bluetooth stack through this trait so
//! that tests can substitute a scripted channel for a real `bluetoothctl`.

use std::path::PathBuf;
use std::time::Duration;

use bluelink_core::prelude::*;
use bluelink_core::DeviceClass;

/// Default interpreter program
pub const DEFAULT_PROGRAM: &str = "bluetoothctl";

/// Commands replayed on every (re)start of the persistent session
pub const DEFAULT_STARTUP_COMMANDS: [&str; 4] =
    ["power on", "agent on", "default-agent", "scan on"];

/// Output fragments that mean the interpreter refused a command
const REJECTION_MARKERS: [&str; 4] = [
    "failed",
    "not available",
    "org.bluez.error",
    "no default controller",
];

/// Operations every control channel supports
#[trait_variant::make(DeviceControl: Send)]
pub trait LocalDeviceControl {
    /// Run one line command on the persistent session and return its output
    async fn execute(&self, command: &str) -> Result<String>;

    /// One-shot `devices [Class]` query, outside the persistent session
    async fn query_devices(&self, class: DeviceClass) -> Result<String>;

    /// Tear down the persistent session and start a fresh one, replaying the
    /// startup commands
    async fn restart(&self) -> Result<()>;

    /// Stop the persistent session
    async fn shutdown(&self) -> Result<()>;
}

/// How the persistent session is started and how long commands may take
#[derive(Debug, Clone)]
pub struct ControlOptions {
    pub program: PathBuf,
    pub startup_commands: Vec<String>,
    /// Upper bound for one command, including slow `Attempting to ...` phases
    pub command_timeout: Duration,
    /// Quiet period after which a command's output is considered complete
    pub idle_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            startup_commands: DEFAULT_STARTUP_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            command_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_millis(400),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Resolve `program` on `PATH`, reporting [`Error::ControlNotFound`] when absent.
pub fn resolve_program(program: &std::path::Path) -> Result<PathBuf> {
    which::which(program).map_err(|_| Error::ControlNotFound {
        program: program.display().to_string(),
    })
}

/// Check command output for rejection markers.
///
/// Returns the output unchanged when the interpreter accepted the command.
pub fn ensure_accepted(command: &str, output: String) -> Result<String> {
    let lower = output.to_lowercase();
    if REJECTION_MARKERS.iter().any(|m| lower.contains(m)) {
        return Err(Error::command_rejected(command, output.trim()));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_output_passes_through() {
        let out = ensure_accepted("connect AA", "Connection successful\n".to_string()).unwrap();
        assert_eq!(out, "Connection successful\n");
    }

    #[test]
    fn test_empty_output_is_accepted() {
        assert!(ensure_accepted("trust AA", String::new()).is_ok());
    }

    #[test]
    fn test_rejections_detected() {
        for output in [
            "Failed to connect: org.bluez.Error.Failed",
            "Device AA:BB:CC:DD:EE:FF not available",
            "No default controller available",
            "org.bluez.Error.AuthenticationFailed",
        ] {
            let err = ensure_accepted("connect AA", output.to_string()).unwrap_err();
            assert!(matches!(err, Error::CommandRejected { .. }), "{}", output);
            assert!(err.is_recoverable());
        }
    }

    #[test]
    fn test_missing_program_reported() {
        let err = resolve_program(std::path::Path::new("bluelink-no-such-program")).unwrap_err();
        assert!(matches!(err, Error::ControlNotFound { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_default_options() {
        let options = ControlOptions::default();
        assert_eq!(options.program, PathBuf::from("bluetoothctl"));
        assert_eq!(
            options.startup_commands,
            vec!["power on", "agent on", "default-agent", "scan on"]
        );
        assert!(options.idle_timeout < options.command_timeout);
    }
}
