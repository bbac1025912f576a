//! OS signal handling for graceful shutdown

use bluelink_core::prelude::*;

/// Resolve once SIGINT or SIGTERM arrives.
///
/// If the handlers cannot be installed the error is logged and the future
/// never resolves, so callers keep running rather than exiting at once.
pub async fn shutdown_signal() {
    match wait_for_signal().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Signal handler error: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Wait for a termination signal
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}
