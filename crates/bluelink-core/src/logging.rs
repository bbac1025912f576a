//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/bluelink/logs/`
/// Log level is controlled by `BLUELINK_LOG` environment variable.
///
/// # Examples
/// ```bash
/// BLUELINK_LOG=debug bluelink daemon
/// BLUELINK_LOG=trace bluelink connect AA:BB:CC:DD:EE:FF
/// ```
pub fn init(role: &str) -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "bluelink.log");

    // Default to info, allow override via BLUELINK_LOG
    let env_filter = EnvFilter::try_from_env("BLUELINK_LOG")
        .unwrap_or_else(|_| EnvFilter::new("bluelink=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!(
        "Bluelink {} starting (pid {}), logging to {}",
        role,
        std::process::id(),
        log_dir.display()
    );

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("bluelink").join("logs"))
}

/// Emit a critical-level event.
///
/// `tracing` has no level above ERROR, so critical events are errors tagged
/// with `critical = true` for filtering in the log sink.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => {
        ::tracing::error!(critical = true, $($arg)+)
    };
}
