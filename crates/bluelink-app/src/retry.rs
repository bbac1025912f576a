//! Retry-with-repair wrapper for lifecycle operations
//!
//! Every public lifecycle operation runs through [`Resilience::run`]:
//!
//! 1. Run the attempt. Success returns the value.
//! 2. On failure, sanitize the request and wait [`RetryPolicy::delay`].
//! 3. Before the final attempt, restart the control session (which replays
//!    its startup commands).
//! 4. If the final attempt fails too, park an exception for the request's
//!    process, log the failure and return `None`.
//!
//! Fatal errors, and argument errors that sanitizing cannot change, give up
//! at once without waiting or restarting the session.
//!
//! A torn-down shared store is not retried: the wrapper flags it and returns
//! `None` straight away so the caller can shut down.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bluelink_core::prelude::*;
use bluelink_daemon::LocalDeviceControl;

use crate::exceptions::{ExceptionRegistry, Operation, ProcessHandle};
use crate::requests::Sanitize;

/// Attempts and pause between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Applies a [`RetryPolicy`] and records exhausted failures.
#[derive(Debug, Clone)]
pub struct Resilience {
    policy: RetryPolicy,
    exceptions: ExceptionRegistry,
    store_lost: Arc<AtomicBool>,
}

impl Resilience {
    pub fn new(policy: RetryPolicy, exceptions: ExceptionRegistry) -> Self {
        Self {
            policy,
            exceptions,
            store_lost: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn exceptions(&self) -> &ExceptionRegistry {
        &self.exceptions
    }

    /// Whether any wrapped operation observed a torn-down store.
    pub fn store_lost(&self) -> bool {
        self.store_lost.load(Ordering::Acquire)
    }

    /// Run `attempt` with retries. `control` is restarted before the final
    /// attempt.
    pub async fn run<C, R, T, F, Fut>(
        &self,
        control: &C,
        operation: Operation,
        mut request: R,
        mut attempt: F,
    ) -> Option<T>
    where
        C: LocalDeviceControl,
        R: Sanitize + Clone + PartialEq,
        F: FnMut(R) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.attempts();
        let mut n = 1;

        loop {
            let error = match attempt(request.clone()).await {
                Ok(value) => {
                    if n > 1 {
                        debug!("{} succeeded after {} attempts", operation, n);
                    }
                    return Some(value);
                }
                Err(e) => e,
            };

            if error.is_store_unavailable() {
                self.store_lost.store(true, Ordering::Release);
                warn!("Shared state unavailable during {}, giving up", operation);
                return None;
            }

            if error.is_fatal() || n >= max_attempts {
                self.give_up(operation, request.process(), n, &error);
                return None;
            }

            let unsanitized = request.clone();
            request.sanitize();
            if matches!(error, Error::InvalidArgument { .. }) && request == unsanitized {
                self.give_up(operation, request.process(), n, &error);
                return None;
            }

            warn!(
                "{} attempt {}/{} failed: {}. Retrying in {:?}",
                operation, n, max_attempts, error, self.policy.delay
            );

            tokio::time::sleep(self.policy.delay).await;
            n += 1;

            if n == max_attempts {
                info!("Restarting control session before final {} attempt", operation);
                if let Err(e) = control.restart().await {
                    error!("Failed to restart control session: {}", e);
                }
            }
        }
    }

    /// Park the failure for `process` and log it.
    fn give_up(
        &self,
        operation: Operation,
        process: ProcessHandle,
        attempts: u32,
        error: &Error,
    ) {
        let process = match process {
            p if p.is_assigned() => p,
            _ => ProcessHandle::UNASSIGNED,
        };
        self.exceptions.record(process, operation);
        error!(
            "{} failed after {} attempt(s) (process {}): {}",
            operation, attempts, process, error
        );
    }
}
