//! One-shot device queries (`bluetoothctl devices [Class]`)

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use bluelink_core::prelude::*;
use bluelink_core::DeviceClass;

use crate::control::resolve_program;

/// Run `<program> devices [Class]` and return its raw stdout.
///
/// Parsing is left to [`bluelink_core::parse_device_list`].
pub async fn query_devices(program: &Path, class: DeviceClass, limit: Duration) -> Result<String> {
    let program = resolve_program(program)?;

    let mut command = Command::new(&program);
    command.arg("devices");
    if let Some(filter) = class.filter_arg() {
        command.arg(filter);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Querying {} devices", class);

    let output = timeout(limit, command.output())
        .await
        .map_err(|_| Error::query(format!("devices query timed out after {:?}", limit)))?
        .map_err(|e| Error::query(format!("failed to run {}: {}", program.display(), e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stderr.trim().is_empty() {
        debug!("devices query stderr: {}", stderr.trim());
    }

    // A non-zero exit with usable output still yields the listing
    if !output.status.success() {
        if stdout.trim().is_empty() {
            return Err(Error::query(format!(
                "devices query failed with exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        warn!(
            "devices query exited with code {:?} but produced output, parsing anyway",
            output.status.code()
        );
    }

    Ok(stdout)
}
