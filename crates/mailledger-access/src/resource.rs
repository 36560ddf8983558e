//! Pooled connection handles.
//!
//! The containers in [`crate::queue`] never look inside a connection. All they
//! need is its absolute expiry deadline, which also defines the pool order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::time::{Clock, deadline_after};

/// A reusable handle to an expensive mail-server connection.
///
/// Containers order residents ascending by [`expires_at`](Self::expires_at).
pub trait PooledResource {
    /// When the connection was established.
    fn created_at(&self) -> Instant;

    /// Absolute deadline after which the connection is due for recycling.
    fn expires_at(&self) -> Instant;

    /// Whether the connection is still usable.
    fn is_valid(&self) -> bool {
        true
    }

    /// Time left before the deadline as seen by `clock`.
    fn delay(&self, clock: &dyn Clock) -> Duration {
        clock.remaining(self.expires_at())
    }
}

impl<R: PooledResource + ?Sized> PooledResource for Arc<R> {
    fn created_at(&self) -> Instant {
        self.as_ref().created_at()
    }

    fn expires_at(&self) -> Instant {
        self.as_ref().expires_at()
    }

    fn is_valid(&self) -> bool {
        self.as_ref().is_valid()
    }
}

impl<R: PooledResource + ?Sized> PooledResource for Box<R> {
    fn created_at(&self) -> Instant {
        self.as_ref().created_at()
    }

    fn expires_at(&self) -> Instant {
        self.as_ref().expires_at()
    }

    fn is_valid(&self) -> bool {
        self.as_ref().is_valid()
    }
}

/// A connection tagged with its lifetime.
///
/// Wraps any connection type (an authenticated IMAP client, an SMTP
/// transport) so it can be parked in an access queue.
#[derive(Debug)]
pub struct Pooled<C> {
    conn: C,
    created_at: Instant,
    expires_at: Instant,
    valid: AtomicBool,
}

impl<C> Pooled<C> {
    /// Wraps a connection established at `created_at` that may be reused for `ttl`.
    ///
    /// A `ttl` too large to represent saturates to a far-future deadline.
    #[must_use]
    pub fn new(conn: C, created_at: Instant, ttl: Duration) -> Self {
        Self {
            conn,
            created_at,
            expires_at: deadline_after(created_at, ttl),
            valid: AtomicBool::new(true),
        }
    }

    /// Wraps a connection established now according to `clock`.
    #[must_use]
    pub fn established(conn: C, clock: &dyn Clock, ttl: Duration) -> Self {
        Self::new(conn, clock.now(), ttl)
    }

    /// Returns the wrapped connection.
    #[must_use]
    pub const fn get(&self) -> &C {
        &self.conn
    }

    /// Returns the wrapped connection mutably.
    pub const fn get_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Unwraps the connection, discarding its pool metadata.
    #[must_use]
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Marks the connection as broken. Never reverts.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

impl<C> PooledResource for Pooled<C> {
    fn created_at(&self) -> Instant {
        self.created_at
    }

    fn expires_at(&self) -> Instant {
        self.expires_at
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::time::MockClock;

    #[test]
    fn test_pooled_deadline() {
        let clock = MockClock::new();
        let conn = Pooled::established("imap-1", &clock, Duration::from_secs(30));

        assert_eq!(conn.expires_at() - conn.created_at(), Duration::from_secs(30));
        assert_eq!(conn.delay(&clock), Duration::from_secs(30));

        clock.advance(Duration::from_secs(31));
        assert_eq!(conn.delay(&clock), Duration::ZERO);
        assert_eq!(conn.into_inner(), "imap-1");
    }

    #[test]
    fn test_unbounded_ttl_does_not_overflow() {
        let clock = MockClock::new();
        let conn = Pooled::established((), &clock, Duration::MAX);
        assert!(conn.expires_at() > conn.created_at());

        clock.advance(Duration::from_secs(60 * 60 * 24 * 365));
        assert!(!clock.is_due(conn.expires_at()));
    }

    #[test]
    fn test_invalidate_is_one_way() {
        let conn = Pooled::new((), Instant::now(), Duration::from_secs(1));
        assert!(conn.is_valid());
        conn.invalidate();
        assert!(!conn.is_valid());

        let shared = Arc::new(conn);
        assert!(!shared.is_valid());
    }
}
