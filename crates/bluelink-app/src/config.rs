//! Settings parser for `~/.config/bluelink/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use bluelink_core::prelude::*;
use bluelink_core::store::{StoreOptions, DEFAULT_STORE_DIR, SET_CAPACITY};
use bluelink_daemon::{ControlOptions, DEFAULT_PROGRAM, DEFAULT_STARTUP_COMMANDS};

use crate::retry::RetryPolicy;

const CONFIG_DIR: &str = "bluelink";
const CONFIG_FILENAME: &str = "config.toml";

/// Global settings, every section optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub control: ControlSettings,
    pub store: StoreSettings,
    pub discovery: DiscoverySettings,
    pub retry: RetrySettings,
    pub exceptions: ExceptionSettings,
}

/// `[control]` - the `bluetoothctl` session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub program: PathBuf,
    pub startup_commands: Vec<String>,
    pub command_timeout_ms: u64,
    /// Quiet period that ends a command's output
    pub idle_ms: u64,
    pub query_timeout_ms: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            startup_commands: DEFAULT_STARTUP_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            command_timeout_ms: 10_000,
            idle_ms: 400,
            query_timeout_ms: 10_000,
        }
    }
}

impl ControlSettings {
    pub fn to_options(&self) -> ControlOptions {
        ControlOptions {
            program: self.program.clone(),
            startup_commands: self.startup_commands.clone(),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            idle_timeout: Duration::from_millis(self.idle_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
        }
    }
}

/// `[store]` - where the shared regions live
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub directory: PathBuf,
    pub set_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_STORE_DIR),
            set_capacity: SET_CAPACITY,
        }
    }
}

impl StoreSettings {
    pub fn to_options(&self) -> StoreOptions {
        StoreOptions {
            directory: self.directory.clone(),
            set_capacity: self.set_capacity,
        }
    }
}

/// `[discovery]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub interval_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

impl DiscoverySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// `[retry]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_delay(Duration::from_millis(self.delay_ms))
    }
}

/// `[exceptions]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExceptionSettings {
    pub retention_secs: u64,
}

impl Default for ExceptionSettings {
    fn default() -> Self {
        Self { retention_secs: 60 }
    }
}

impl ExceptionSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Default config location, `$XDG_CONFIG_HOME/bluelink/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Read and parse one settings file.
pub fn read_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
}

/// Load settings from `path`, or from [`default_config_path()`] when `None`.
///
/// Missing or unparseable files fall back to defaults.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let Some(config_path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
        debug!("No config directory, using defaults");
        return Settings::default();
    };

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match read_settings(&config_path) {
        Ok(settings) => {
            debug!("Loaded settings from {:?}", config_path);
            settings
        }
        Err(e) => {
            warn!("{}, using defaults", e);
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(Some(&temp.path().join("config.toml")));

        assert_eq!(settings.control.program, PathBuf::from("bluetoothctl"));
        assert_eq!(settings.control.startup_commands.len(), 4);
        assert_eq!(settings.store.directory, PathBuf::from("/dev/shm"));
        assert_eq!(settings.store.set_capacity, 256);
        assert_eq!(settings.discovery.interval(), Duration::from_secs(5));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.exceptions.retention(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");

        let config = r#"
[control]
startup_commands = ["power on"]
idle_ms = 250

[store]
directory = "/tmp/bluelink-test"

[retry]
max_attempts = 5
delay_ms = 10
"#;
        std::fs::write(&path, config).unwrap();

        let settings = load_settings(Some(&path));

        assert_eq!(settings.control.startup_commands, vec!["power on"]);
        assert_eq!(settings.control.idle_ms, 250);
        // Unset keys keep their defaults
        assert_eq!(settings.control.command_timeout_ms, 10_000);
        assert_eq!(settings.store.directory, PathBuf::from("/tmp/bluelink-test"));
        assert_eq!(settings.store.set_capacity, 256);

        let policy = settings.retry.to_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_millis(10));
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[retry\nmax_attempts = ").unwrap();

        assert!(matches!(read_settings(&path), Err(Error::Config { .. })));

        let settings = load_settings(Some(&path));
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    fn test_read_settings_missing_file_is_io_error() {
        let temp = tempdir().unwrap();
        let result = read_settings(&temp.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_control_options_conversion() {
        let options = ControlSettings::default().to_options();
        assert_eq!(options.idle_timeout, Duration::from_millis(400));
        assert_eq!(options.command_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let settings = DiscoverySettings { interval_secs: 0 };
        assert_eq!(settings.interval(), Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn test_default_path_follows_xdg_config_home() {
        let temp = tempdir().unwrap();
        let previous = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", temp.path());

        let path = default_config_path();

        match previous {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }

        assert_eq!(
            path,
            Some(temp.path().join("bluelink").join("config.toml"))
        );
    }
}
