//! The session-side contract for supervised IDLE waits.
//!
//! A protocol driver that enters IDLE hands the registry two things: the
//! session (who is waiting) and a blocking handle (what to close to break
//! the wait). [`IdleTracker`] is a ready-made session that enforces the
//! lifecycle below.
//!
//! ```text
//! Registered ─begin_wait→ Waiting ─mark_interrupted→ ExpiredAndInterrupted ─┐
//!     │                      │                                              ├─terminate→ Terminal
//!     └──────────finish──────┴────────────────────→ RemovedExplicitly ──────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::Result;

/// Identity of an IDLE session.
///
/// Registrations compare equal by this id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Wraps a caller-assigned id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a process-unique id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idle-{}", self.0)
    }
}

/// A session that may be blocked in an IDLE wait.
pub trait IdleSession: Send + Sync {
    /// Stable identity of the session.
    fn id(&self) -> SessionId;

    /// Whether the session is currently blocked in its wait.
    fn is_waiting(&self) -> bool;

    /// Flags a waiting session as interrupted.
    ///
    /// Returns `false` without side effects if the session is not waiting,
    /// in which case its handle must be left alone.
    fn mark_interrupted(&self) -> bool;
}

/// The resource a session is blocked on.
pub trait BlockingHandle: Send + Sync {
    /// Forcibly closes the resource so the blocked wait returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource could not be closed.
    fn force_close(&self) -> Result<()>;
}

/// An IDLE wait running as its own task is closed by aborting it.
impl BlockingHandle for tokio::task::AbortHandle {
    fn force_close(&self) -> Result<()> {
        self.abort();
        Ok(())
    }
}

/// Lifecycle of a supervised IDLE session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdleState {
    /// Registered but not yet blocked.
    Registered = 0,
    /// Blocked in the IDLE wait.
    Waiting = 1,
    /// Overran its deadline and was interrupted by the supervisor.
    ExpiredAndInterrupted = 2,
    /// Finished normally and deregistered.
    RemovedExplicitly = 3,
    /// Done; no further transitions.
    Terminal = 4,
}

impl IdleState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Registered,
            1 => Self::Waiting,
            2 => Self::ExpiredAndInterrupted,
            3 => Self::RemovedExplicitly,
            _ => Self::Terminal,
        }
    }
}

/// An [`IdleSession`] that tracks its lifecycle with atomic transitions.
#[derive(Debug)]
pub struct IdleTracker {
    id: SessionId,
    state: AtomicU8,
    interrupted: AtomicBool,
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleTracker {
    /// Creates a tracker with a fresh id in the `Registered` state.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(SessionId::next())
    }

    /// Creates a tracker with a caller-assigned id.
    #[must_use]
    pub const fn with_id(id: SessionId) -> Self {
        Self {
            id,
            state: AtomicU8::new(IdleState::Registered as u8),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> IdleState {
        IdleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the supervisor ever interrupted this session.
    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// `Registered` → `Waiting`.
    pub fn begin_wait(&self) -> bool {
        self.transition(IdleState::Registered, IdleState::Waiting)
    }

    /// `Registered` or `Waiting` → `RemovedExplicitly`.
    ///
    /// Fails if the supervisor got there first.
    pub fn finish(&self) -> bool {
        self.transition(IdleState::Waiting, IdleState::RemovedExplicitly)
            || self.transition(IdleState::Registered, IdleState::RemovedExplicitly)
    }

    /// `ExpiredAndInterrupted` or `RemovedExplicitly` → `Terminal`.
    pub fn terminate(&self) -> bool {
        self.transition(IdleState::ExpiredAndInterrupted, IdleState::Terminal)
            || self.transition(IdleState::RemovedExplicitly, IdleState::Terminal)
    }

    fn transition(&self, from: IdleState, to: IdleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl IdleSession for IdleTracker {
    fn id(&self) -> SessionId {
        self.id
    }

    fn is_waiting(&self) -> bool {
        self.state() == IdleState::Waiting
    }

    fn mark_interrupted(&self) -> bool {
        let moved = self.transition(IdleState::Waiting, IdleState::ExpiredAndInterrupted);
        if moved {
            self.interrupted.store(true, Ordering::Release);
        }
        moved
    }
}
