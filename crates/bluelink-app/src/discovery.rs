//! Discovery loop
//!
//! At most one process runs the loop. Ownership is claimed through the shared
//! discovery flag: a process that finds it clear sets it and runs; a process
//! that finds it set leaves discovery to its owner. Reading and setting the
//! flag are two separate steps, so two processes starting in the same instant
//! can both claim it.
//!
//! ```text
//! NotRunning ──claim──▶ Running ──signal / store gone──▶ Stopping ──▶ Stopped
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use bluelink_core::prelude::*;
use bluelink_core::store::SharedStore;
use bluelink_daemon::LocalDeviceControl;

use crate::exceptions::ProcessHandle;
use crate::manager::DeviceManager;

/// Default time between discovery passes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    NotRunning,
    Running,
    Stopping,
    Stopped,
}

/// Outcome of [`DiscoveryLoop::try_claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    /// Another process owns discovery
    AlreadyRunning,
}

/// Set the shared discovery flag unless another process already holds it.
pub fn claim_discovery(store: &SharedStore) -> Result<Claim> {
    if store.discovery_active()? {
        info!("Discovery is already running in another process");
        return Ok(Claim::AlreadyRunning);
    }

    store.set_discovery(true)?;
    info!("Claimed the discovery loop");
    Ok(Claim::Claimed)
}

pub struct DiscoveryLoop<C> {
    manager: Arc<DeviceManager<C>>,
    interval: Duration,
    state: LoopState,
    process: ProcessHandle,
}

impl<C: LocalDeviceControl> DiscoveryLoop<C> {
    pub fn new(manager: Arc<DeviceManager<C>>, interval: Duration) -> Self {
        let process = manager.start_process();
        Self {
            manager,
            interval,
            state: LoopState::NotRunning,
            process,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Handle under which discovery failures are recorded.
    pub fn process(&self) -> ProcessHandle {
        self.process
    }

    /// Adopt a claim made with [`claim_discovery`] before this loop existed.
    pub fn claimed(manager: Arc<DeviceManager<C>>, interval: Duration) -> Self {
        let mut discovery = Self::new(manager, interval);
        discovery.state = LoopState::Running;
        discovery
    }

    /// Claim discovery for this process if no other process holds it.
    pub fn try_claim(&mut self) -> Result<Claim> {
        if self.state != LoopState::NotRunning {
            return Ok(match self.state {
                LoopState::Running => Claim::Claimed,
                _ => Claim::AlreadyRunning,
            });
        }

        let claim = claim_discovery(self.manager.store())?;
        if claim == Claim::Claimed {
            self.state = LoopState::Running;
            debug!("Discovery failures recorded under process {}", self.process);
        }
        Ok(claim)
    }

    /// Run discovery passes until `shutdown` resolves or the shared store is
    /// torn down, then shut down. Returns the final state.
    pub async fn run<S>(&mut self, shutdown: S) -> LoopState
    where
        S: Future<Output = ()>,
    {
        if self.state != LoopState::Running {
            warn!("Discovery loop was not claimed, not starting");
            return self.state;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut passes: u64 = 0;
        loop {
            let signalled = tokio::select! {
                _ = &mut shutdown => true,
                _ = ticker.tick() => false,
            };
            if signalled {
                info!("Shutdown requested after {} discovery passes", passes);
                break;
            }

            // A signal during a pass abandons it, retries included
            passes += 1;
            let pass = tokio::select! {
                _ = &mut shutdown => None,
                connected = self.manager.discover(self.process) => Some(connected),
            };
            match pass {
                None => {
                    info!("Shutdown requested during discovery pass {}", passes);
                    break;
                }
                Some(Some(connected)) => {
                    trace!("Discovery pass {} connected {} device(s)", passes, connected);
                }
                Some(None) => {}
            }

            if !self.manager.store().is_available() {
                warn!("Shared state was torn down, stopping discovery");
                break;
            }
        }

        self.shutdown().await;
        self.state
    }

    /// Stop the control session and, if this process owns discovery, tear
    /// down the shared store. Idempotent.
    pub async fn shutdown(&mut self) {
        if matches!(self.state, LoopState::Stopping | LoopState::Stopped) {
            return;
        }

        let owned = self.state == LoopState::Running;
        self.state = LoopState::Stopping;

        if let Err(e) = self.manager.control().shutdown().await {
            warn!("Failed to stop control session: {}", e);
        }

        let store = self.manager.store();
        if owned && store.is_available() {
            store.teardown();
        }

        self.state = LoopState::Stopped;
        info!("Discovery loop stopped");
    }
}
