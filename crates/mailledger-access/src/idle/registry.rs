//! Delay queue of active IDLE registrations.
//!
//! Protocol drivers register a session when they start an IDLE wait and
//! deregister when it ends normally. The supervisor drains whatever has
//! overrun its deadline.
//!
//! Deadlines are measured on tokio's clock so a paused test runtime drives
//! them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

use super::config::{DEFAULT_IDLE_TIMEOUT, SupervisorConfig};
use super::interrupt::Interrupt;
use super::session::{BlockingHandle, IdleSession, SessionId};
use crate::{Error, Result, time};

/// One supervised IDLE wait.
///
/// Equality and hashing use the session id only. Drain order uses the
/// deadline only; see [`cmp_deadline`](Self::cmp_deadline).
#[derive(Clone)]
pub struct Registration {
    session: Arc<dyn IdleSession>,
    handle: Arc<dyn BlockingHandle>,
    deadline: Instant,
    // Unique per add; a session may be registered again after a drain.
    token: u64,
}

impl Registration {
    /// The waiting session.
    #[must_use]
    pub fn session(&self) -> &Arc<dyn IdleSession> {
        &self.session
    }

    /// The resource the session is blocked on.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn BlockingHandle> {
        &self.handle
    }

    /// Session identity.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// Absolute deadline of the wait.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Orders registrations by deadline, ignoring identity.
    #[must_use]
    pub fn cmp_deadline(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

impl PartialEq for Registration {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Registration {}

impl Hash for Registration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("session", &self.id())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Heap entry putting the earliest deadline on top.
#[derive(Debug)]
struct Due(Registration);

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline
    }
}

impl Eq for Due {}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp_deadline(&self.0)
    }
}

fn drain_due(queue: &mut BinaryHeap<Due>, now: Instant) -> Vec<Registration> {
    let mut expired = Vec::new();
    while queue.peek().is_some_and(|due| due.0.deadline <= now) {
        if let Some(due) = queue.pop() {
            expired.push(due.0);
        }
    }
    expired
}

fn deadline_after(timeout: Duration) -> Instant {
    Instant::from_std(time::deadline_after(Instant::now().into_std(), timeout))
}

/// Thread-safe delay queue of IDLE registrations.
#[derive(Debug)]
pub struct IdleRegistry {
    queue: Mutex<BinaryHeap<Due>>,
    changed: Notify,
    default_timeout: Duration,
    next_token: AtomicU64,
}

impl Default for IdleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleRegistry {
    /// Creates an empty registry using [`DEFAULT_IDLE_TIMEOUT`] for [`watch`](Self::watch).
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_IDLE_TIMEOUT)
    }

    /// Creates an empty registry with a custom timeout for [`watch`](Self::watch).
    #[must_use]
    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            changed: Notify::new(),
            default_timeout,
            next_token: AtomicU64::new(0),
        }
    }

    /// Creates an empty registry whose [`watch`](Self::watch) timeout is
    /// `config.default_idle_timeout`.
    #[must_use]
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::with_default_timeout(config.default_idle_timeout)
    }

    /// Timeout applied by [`watch`](Self::watch).
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Due>> {
        // Every critical section leaves the heap intact, so a poisoned lock is still usable.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `session` as blocked on `handle` until `timeout` from now.
    ///
    /// Always succeeds.
    pub fn add(
        &self,
        session: Arc<dyn IdleSession>,
        handle: Arc<dyn BlockingHandle>,
        timeout: Duration,
    ) -> bool {
        self.insert(session, handle, timeout);
        true
    }

    fn insert(
        &self,
        session: Arc<dyn IdleSession>,
        handle: Arc<dyn BlockingHandle>,
        timeout: Duration,
    ) -> u64 {
        let deadline = deadline_after(timeout);
        let token = self.next_token.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!(session = %session.id(), ?timeout, "registering idle session");
        self.lock().push(Due(Registration {
            session,
            handle,
            deadline,
            token,
        }));
        self.changed.notify_waiters();
        token
    }

    /// Removes the registration for `session`.
    ///
    /// Returns `false` if it was not registered, including when the
    /// supervisor already drained it.
    pub fn remove(&self, session: SessionId) -> bool {
        self.remove_first(|registration| registration.id() == session)
    }

    fn remove_first(&self, matches: impl Fn(&Registration) -> bool) -> bool {
        let mut queue = self.lock();
        let mut entries = std::mem::take(&mut *queue).into_vec();
        let removed = entries
            .iter()
            .position(|due| matches(&due.0))
            .map(|index| entries.swap_remove(index));
        *queue = BinaryHeap::from(entries);
        drop(queue);

        let Some(due) = removed else {
            return false;
        };
        tracing::trace!(session = %due.0.id(), "idle session deregistered");
        self.changed.notify_waiters();
        true
    }

    /// Drains every registration whose deadline has passed, without waiting.
    pub fn remove_expired(&self) -> Vec<Registration> {
        drain_due(&mut self.lock(), Instant::now())
    }

    /// Waits until at least one registration has expired, then drains every
    /// registration expired at that instant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if `interrupt` is raised before or
    /// during the wait. The flag is lowered when this happens.
    pub async fn await_expired(&self, interrupt: &Interrupt) -> Result<Vec<Registration>> {
        loop {
            if interrupt.clear() {
                return Err(Error::Interrupted);
            }

            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let next = {
                let mut queue = self.lock();
                let expired = drain_due(&mut queue, Instant::now());
                if !expired.is_empty() {
                    return Ok(expired);
                }
                queue.peek().map(|due| due.0.deadline)
            };

            if let Some(deadline) = next {
                tokio::select! {
                    () = sleep_until(deadline) => {}
                    () = &mut changed => {}
                    () = interrupt.interrupted() => {}
                }
            } else {
                tokio::select! {
                    () = &mut changed => {}
                    () = interrupt.interrupted() => {}
                }
            }
        }
    }

    /// Like [`await_expired`](Self::await_expired), but keeps waiting through
    /// interrupts.
    ///
    /// Any interrupt absorbed along the way is raised again on `interrupt`
    /// before returning, so the caller can still observe it.
    pub async fn await_expired_uninterruptible(&self, interrupt: &Interrupt) -> Vec<Registration> {
        let mut absorbed = false;
        let batch = loop {
            if let Ok(batch) = self.await_expired(interrupt).await {
                break batch;
            }
            absorbed = true;
        };
        if absorbed {
            interrupt.interrupt();
        }
        batch
    }

    /// Number of active registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.lock().peek().map(|due| due.0.deadline)
    }

    /// Registers `session` with the default timeout and returns a guard that
    /// deregisters it when dropped.
    ///
    /// The guard only ever removes its own registration, never a later one
    /// for the same session.
    pub fn watch(
        self: &Arc<Self>,
        session: Arc<dyn IdleSession>,
        handle: Arc<dyn BlockingHandle>,
    ) -> IdleGuard {
        let id = session.id();
        let token = self.insert(session, handle, self.default_timeout);
        IdleGuard {
            registry: Arc::clone(self),
            session: id,
            token,
            armed: true,
        }
    }
}

/// Deregisters an IDLE session when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard deregisters the session immediately"]
pub struct IdleGuard {
    registry: Arc<IdleRegistry>,
    session: SessionId,
    token: u64,
    armed: bool,
}

impl IdleGuard {
    /// The guarded session.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Deregisters now.
    ///
    /// Returns `false` if the supervisor had already drained the
    /// registration, i.e. the wait overran its deadline.
    pub fn finish(mut self) -> bool {
        self.armed = false;
        self.deregister()
    }

    fn deregister(&self) -> bool {
        let token = self.token;
        self.registry
            .remove_first(|registration| registration.token == token)
    }
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        if self.armed {
            self.deregister();
        }
    }
}
