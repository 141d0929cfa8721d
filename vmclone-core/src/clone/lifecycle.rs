//! Bringing the source VM down before its disks are copied.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, instrument, warn};

use crate::error::{CloneError, Result};
use crate::traits::Hypervisor;

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default activity poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How the VM ended up stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    Graceful,
    Forced,
}

/// Graceful shutdown with forced stop fallback.
#[derive(Debug, Clone)]
pub struct LifecycleController {
    timeout: Duration,
    poll_interval: Duration,
}

impl LifecycleController {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Stop the VM, forcing it off if it is still running after the timeout.
    ///
    /// A forced stop that fails, or leaves the VM active, is a
    /// [`CloneError::Lifecycle`].
    #[instrument(skip(self, hypervisor), fields(timeout_secs = self.timeout.as_secs()))]
    pub async fn ensure_stopped(&self, hypervisor: &dyn Hypervisor, vm: &str) -> Result<StopOutcome> {
        if !hypervisor.is_active(vm).await? {
            return Ok(StopOutcome::AlreadyStopped);
        }

        info!("VM running, requesting shutdown");
        match hypervisor.request_shutdown(vm).await {
            Ok(()) => {
                if self.wait_inactive(hypervisor, vm).await? {
                    info!("VM stopped gracefully");
                    return Ok(StopOutcome::Graceful);
                }
                warn!("Graceful shutdown timed out, stopping VM");
            }
            Err(e) => warn!(error = %e, "Shutdown request rejected, stopping VM"),
        }

        hypervisor
            .force_stop(vm)
            .await
            .map_err(|e| CloneError::Lifecycle {
                vm: vm.to_string(),
                reason: format!("forced stop failed: {}", e),
            })?;

        if hypervisor.is_active(vm).await? {
            return Err(CloneError::Lifecycle {
                vm: vm.to_string(),
                reason: "VM still active after forced stop".to_string(),
            });
        }

        info!("VM force stopped");
        Ok(StopOutcome::Forced)
    }

    /// Poll until the VM is inactive. Returns false on timeout.
    ///
    /// A timeout too large to represent as a deadline never expires.
    async fn wait_inactive(&self, hypervisor: &dyn Hypervisor, vm: &str) -> Result<bool> {
        let deadline = Instant::now().checked_add(self.timeout);
        loop {
            if !hypervisor.is_active(vm).await? {
                return Ok(true);
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            sleep(pause).await;
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBackend, MockCall, ShutdownBehavior};

    const VM: &str = "<domain type='kvm'><name>app01</name><devices/></domain>";

    fn controller() -> LifecycleController {
        LifecycleController::new(Duration::from_millis(50), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_already_stopped() {
        let backend = MockBackend::new();
        backend.add_domain(VM, false);

        let outcome = controller().ensure_stopped(&backend, "app01").await.unwrap();
        assert_eq!(outcome, StopOutcome::AlreadyStopped);
        assert!(!backend.mutated());
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let backend = MockBackend::new();
        backend.add_domain(VM, true);

        let outcome = controller().ensure_stopped(&backend, "app01").await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
        assert!(!backend.calls().contains(&MockCall::ForceStop("app01".into())));
        assert_eq!(backend.active("app01"), Some(false));
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let backend = MockBackend::new();
        backend.add_domain(VM, true);

        let controller =
            LifecycleController::new(Duration::from_secs(u64::MAX), Duration::from_millis(5));
        let outcome = controller.ensure_stopped(&backend, "app01").await.unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_forced_after_timeout() {
        let backend = MockBackend::new();
        backend.add_domain(VM, true);
        backend.set_shutdown_behavior("app01", ShutdownBehavior::Ignore);

        let started = Instant::now();
        let outcome = controller().ensure_stopped(&backend, "app01").await.unwrap();
        assert_eq!(outcome, StopOutcome::Forced);
        assert!(started.elapsed() >= Duration::from_millis(50));

        let calls = backend.calls();
        let polls = calls.iter().filter(|c| matches!(c, MockCall::IsActive(_))).count();
        assert!(polls > 2);
        assert!(calls.contains(&MockCall::RequestShutdown("app01".into())));
        assert!(calls.contains(&MockCall::ForceStop("app01".into())));
    }

    #[tokio::test]
    async fn test_failed_forced_stop_is_reported() {
        let backend = MockBackend::new();
        backend.add_domain(VM, true);
        backend.set_shutdown_behavior("app01", ShutdownBehavior::Stuck);

        let err = controller().ensure_stopped(&backend, "app01").await.unwrap_err();
        assert!(matches!(err, CloneError::Lifecycle { .. }));
        assert!(err.to_string().contains("app01"));
    }
}
