//! Interrupts IDLE sessions that overran their deadline.
//!
//! Both strategies share [`interrupt_expired`]:
//!
//! - **Continuous** ([`run_continuous`], [`spawn_continuous`]): a dedicated
//!   task blocks in [`IdleRegistry::await_expired`] and wakes exactly when
//!   the next deadline passes.
//! - **Periodic** ([`sweep`], [`spawn_periodic`]): each tick drains the
//!   registry without blocking. Cheaper when no dedicated task is wanted, at
//!   the cost of up to one period of lateness.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::config::{CancellationPolicy, SupervisorConfig, SupervisorMode};
use super::interrupt::Interrupt;
use super::registry::{IdleRegistry, Registration};
use crate::{Error, Result};

/// Outcome of one drain-and-interrupt pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
    /// Registrations drained from the registry.
    pub expired: usize,
    /// Sessions that were still waiting and got interrupted.
    pub interrupted: usize,
    /// Interrupted sessions whose handle failed to close.
    pub close_failures: usize,
}

/// Interrupts every session in `batch` that is still waiting.
///
/// Sessions that already finished are skipped. A handle that fails to close
/// is logged and does not stop the rest of the batch.
pub fn interrupt_expired(batch: Vec<Registration>) -> SweepStats {
    let mut stats = SweepStats {
        expired: batch.len(),
        ..SweepStats::default()
    };

    for registration in batch {
        let session = registration.id();
        if !registration.session().mark_interrupted() {
            tracing::trace!(%session, "expired session no longer waiting");
            continue;
        }
        stats.interrupted += 1;
        tracing::debug!(%session, "interrupting overdue idle session");

        if let Err(error) = registration.handle().force_close() {
            stats.close_failures += 1;
            tracing::warn!(%session, %error, "Failed to close overdue idle session");
        }
    }

    stats
}

/// Drains whatever has expired right now and interrupts it.
pub fn sweep(registry: &IdleRegistry) -> SweepStats {
    interrupt_expired(registry.remove_expired())
}

fn on_interrupt(policy: CancellationPolicy) -> Result<()> {
    match policy {
        CancellationPolicy::Swallow => Ok(()),
        CancellationPolicy::Propagate => Err(Error::Interrupted),
    }
}

/// Blocks on `registry` and interrupts sessions as they expire until
/// `interrupt` is raised.
///
/// # Errors
///
/// Returns [`Error::Interrupted`] on shutdown if `policy` is
/// [`CancellationPolicy::Propagate`].
pub async fn run_continuous(
    registry: &IdleRegistry,
    interrupt: &Interrupt,
    policy: CancellationPolicy,
) -> Result<()> {
    tracing::info!("Idle supervisor started");
    loop {
        match registry.await_expired(interrupt).await {
            Ok(batch) => {
                interrupt_expired(batch);
            }
            Err(Error::Interrupted) => {
                tracing::info!(pending = registry.len(), "Idle supervisor stopped");
                return on_interrupt(policy);
            }
            Err(e) => return Err(e),
        }
    }
}

/// A running supervisor task.
#[derive(Debug)]
pub struct SupervisorHandle {
    interrupt: Interrupt,
    task: JoinHandle<Result<()>>,
}

impl SupervisorHandle {
    /// Asks the supervisor to stop without waiting for it.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the supervisor and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns the supervisor's own outcome, or [`Error::Join`] if the task
    /// panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.interrupt.interrupt();
        self.task.await?
    }
}

/// Spawns [`run_continuous`] on the current tokio runtime.
#[must_use]
pub fn spawn_continuous(registry: Arc<IdleRegistry>, policy: CancellationPolicy) -> SupervisorHandle {
    let interrupt = Interrupt::new();
    let worker = interrupt.clone();
    let task = tokio::spawn(async move { run_continuous(&registry, &worker, policy).await });
    SupervisorHandle { interrupt, task }
}

/// Spawns a ticker that calls [`sweep`] every `period`.
///
/// # Errors
///
/// Returns [`Error::Config`] if `period` is zero.
pub fn spawn_periodic(
    registry: Arc<IdleRegistry>,
    period: Duration,
    policy: CancellationPolicy,
) -> Result<SupervisorHandle> {
    if period.is_zero() {
        return Err(Error::Config("sweep period must be non-zero".to_string()));
    }
    let interrupt = Interrupt::new();
    let worker = interrupt.clone();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(?period, "Idle sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = sweep(&registry);
                    if stats.expired > 0 {
                        tracing::debug!(?stats, "Idle sweep");
                    }
                }
                () = worker.interrupted() => {
                    worker.clear();
                    tracing::info!(pending = registry.len(), "Idle sweeper stopped");
                    return on_interrupt(policy);
                }
            }
        }
    });
    Ok(SupervisorHandle { interrupt, task })
}

/// Starts the strategy selected by `config` over an existing registry.
///
/// Only the mode and cancellation policy are read here. The registry keeps
/// its own default timeout; build it with [`IdleRegistry::from_config`] (or
/// use [`start`]) so `config.default_idle_timeout` applies to
/// [`IdleRegistry::watch`].
///
/// # Errors
///
/// Returns [`Error::Config`] if `config` is invalid.
pub fn spawn(registry: Arc<IdleRegistry>, config: &SupervisorConfig) -> Result<SupervisorHandle> {
    config.validate()?;
    match config.mode {
        SupervisorMode::Continuous => Ok(spawn_continuous(registry, config.cancellation)),
        SupervisorMode::Periodic { period } => spawn_periodic(registry, period, config.cancellation),
    }
}

/// Creates a registry from `config` and starts its supervisor.
///
/// # Errors
///
/// Returns [`Error::Config`] if `config` is invalid.
pub fn start(config: &SupervisorConfig) -> Result<(Arc<IdleRegistry>, SupervisorHandle)> {
    let registry = Arc::new(IdleRegistry::from_config(config));
    let supervisor = spawn(Arc::clone(&registry), config)?;
    Ok((registry, supervisor))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::sleep;

    use super::*;
    use crate::idle::session::{BlockingHandle, IdleSession, IdleTracker, SessionId};

    #[derive(Default)]
    struct CountingHandle {
        closes: AtomicUsize,
        fail: bool,
    }

    impl CountingHandle {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    impl BlockingHandle for CountingHandle {
        fn force_close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Close("mailbox folder already closed".to_string()));
            }
            Ok(())
        }
    }

    fn waiting(id: u64) -> Arc<IdleTracker> {
        let tracker = Arc::new(IdleTracker::with_id(SessionId::new(id)));
        assert!(tracker.begin_wait());
        tracker
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_interrupts_only_waiting_sessions() {
        let registry = IdleRegistry::new();
        let busy = waiting(1);
        let busy_handle = Arc::new(CountingHandle::default());
        let done = waiting(2);
        let done_handle = Arc::new(CountingHandle::default());
        registry.add(busy.clone(), busy_handle.clone(), Duration::from_millis(10));
        registry.add(done.clone(), done_handle.clone(), Duration::from_millis(10));
        assert!(done.finish());

        sleep(Duration::from_millis(10)).await;
        let stats = sweep(&registry);

        assert_eq!(stats.expired, 2);
        assert_eq!(stats.interrupted, 1);
        assert!(busy.was_interrupted());
        assert_eq!(busy_handle.closes(), 1);
        assert!(!done.was_interrupted());
        assert_eq!(done_handle.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_failure_does_not_stop_batch() {
        let registry = IdleRegistry::new();
        let broken = waiting(1);
        let broken_handle = Arc::new(CountingHandle::failing());
        let healthy = waiting(2);
        let healthy_handle = Arc::new(CountingHandle::default());
        registry.add(broken.clone(), broken_handle.clone(), Duration::from_millis(5));
        registry.add(healthy.clone(), healthy_handle.clone(), Duration::from_millis(10));

        sleep(Duration::from_millis(10)).await;
        let stats = sweep(&registry);

        assert_eq!(stats.interrupted, 2);
        assert_eq!(stats.close_failures, 1);
        assert_eq!(broken_handle.closes(), 1);
        assert_eq!(healthy_handle.closes(), 1);
        assert!(healthy.was_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinterrupting_is_idempotent() {
        let session = waiting(1);
        let handle = Arc::new(CountingHandle::default());
        let registry = IdleRegistry::new();
        registry.add(session.clone(), handle.clone(), Duration::ZERO);
        registry.add(session.clone(), handle.clone(), Duration::ZERO);

        let stats = sweep(&registry);
        assert_eq!(stats.expired, 2);
        assert_eq!(stats.interrupted, 1);
        assert_eq!(handle.closes(), 1);
        assert!(!session.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_interrupts_once() {
        let registry = Arc::new(IdleRegistry::new());
        let session = waiting(1);
        let handle = Arc::new(CountingHandle::default());
        registry.add(session.clone(), handle.clone(), Duration::from_millis(50));

        let supervisor = spawn_continuous(Arc::clone(&registry), CancellationPolicy::Swallow);
        sleep(Duration::from_millis(49)).await;
        assert_eq!(handle.closes(), 0);

        sleep(Duration::from_millis(51)).await;
        assert!(session.was_interrupted());
        assert_eq!(handle.closes(), 1);
        assert!(registry.is_empty());

        supervisor.shutdown().await.unwrap();
        assert_eq!(handle.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_propagates_shutdown() {
        let registry = Arc::new(IdleRegistry::new());
        let supervisor = spawn_continuous(registry, CancellationPolicy::Propagate);
        tokio::task::yield_now().await;
        assert!(!supervisor.is_finished());

        let outcome = supervisor.shutdown().await;
        assert!(matches!(outcome, Err(Error::Interrupted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweeps_on_tick() {
        let registry = Arc::new(IdleRegistry::new());
        let session = waiting(1);
        let handle = Arc::new(CountingHandle::default());
        registry.add(session.clone(), handle.clone(), Duration::from_millis(150));

        let config = SupervisorConfig::builder()
            .periodic(Duration::from_millis(100))
            .build()
            .unwrap();
        let supervisor = spawn(Arc::clone(&registry), &config).unwrap();

        sleep(Duration::from_millis(120)).await;
        assert_eq!(handle.closes(), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.closes(), 1);
        assert!(session.was_interrupted());

        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_applies_configured_timeout() {
        let config = SupervisorConfig::builder()
            .default_idle_timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let (registry, supervisor) = start(&config).unwrap();

        let session = waiting(1);
        let handle = Arc::new(CountingHandle::default());
        let _guard = registry.watch(session.clone(), handle.clone());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.closes(), 1);
        assert!(session.was_interrupted());

        supervisor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_periodic_rejects_zero_period() {
        let result = spawn_periodic(
            Arc::new(IdleRegistry::new()),
            Duration::ZERO,
            CancellationPolicy::Swallow,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let config = SupervisorConfig {
            mode: SupervisorMode::Periodic {
                period: Duration::ZERO,
            },
            ..SupervisorConfig::default()
        };
        let result = spawn(Arc::new(IdleRegistry::new()), &config);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
