//! Mail access queues.
//!
//! An access queue parks idle connections for one route (account + protocol)
//! until they are checked out again or fall due for recycling. Two
//! implementations share the [`AccessQueue`] contract:
//!
//! - [`BoundedExpiryQueue`]: a capacity-bounded min-heap keyed by expiry
//!   deadline. It does no locking of its own; the owner serializes access.
//! - [`SingletonSlot`]: a capacity-1 cell updated with compare-and-swap, safe
//!   for any number of concurrent callers.
//!
//! Both carry an advisory *deprecated* flag. Marking a queue deprecated tells
//! its owner to retire it after a reconfiguration; the queue keeps accepting
//! offers regardless.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use mailledger_access::queue::access_queue;
//! use mailledger_access::resource::Pooled;
//! use mailledger_access::time::SystemClock;
//!
//! let mut pool = access_queue::<Pooled<&str>>(4);
//! let conn = Arc::new(Pooled::established("imap", &SystemClock, Duration::from_secs(300)));
//! assert!(pool.offer(conn).is_ok());
//! assert!(pool.poll().is_some());
//! ```

mod bounded;
mod singleton;

use std::sync::Arc;

pub use bounded::BoundedExpiryQueue;
pub use singleton::SingletonSlot;

use crate::Result;
use crate::resource::PooledResource;
use crate::time::{Clock, SystemClock};

/// Operations shared by every access queue.
///
/// Rejections are reported by handing the resource back in `Err`, so the
/// caller can close the connection it could not park.
pub trait AccessQueue<R> {
    /// Parks `resource` if there is room, otherwise returns it.
    fn offer(&mut self, resource: R) -> std::result::Result<(), R>;

    /// Alias of [`offer`](Self::offer).
    fn add(&mut self, resource: R) -> std::result::Result<(), R> {
        self.offer(resource)
    }

    /// Removes the resident with the earliest deadline.
    fn poll(&mut self) -> Option<R>;

    /// Removes the earliest resident only if its deadline has passed.
    fn poll_delayed(&mut self) -> Option<R>;

    /// Like [`poll`](Self::poll) but fails with [`Error::Empty`](crate::Error::Empty).
    fn remove(&mut self) -> Result<R>;

    /// Keeps only the residents for which `keep` returns `true`.
    fn retain(&mut self, keep: &mut dyn FnMut(&R) -> bool);

    /// Number of residents.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is parked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of residents, or `None` if unbounded.
    fn capacity(&self) -> Option<usize>;

    /// Flags this queue for retirement. Never reverts.
    fn mark_deprecated(&self);

    /// Whether [`mark_deprecated`](Self::mark_deprecated) has been called.
    fn is_deprecated(&self) -> bool;
}

/// Creates an access queue sized for `capacity` connections.
///
/// A capacity of 1 yields a lock-free [`SingletonSlot`]; anything else
/// yields a [`BoundedExpiryQueue`] (0 meaning unbounded).
#[must_use]
pub fn access_queue<R>(capacity: usize) -> Box<dyn AccessQueue<Arc<R>> + Send>
where
    R: PooledResource + Send + Sync + 'static,
{
    access_queue_with_clock(capacity, SystemClock)
}

/// Like [`access_queue`], reading time from `clock`.
#[must_use]
pub fn access_queue_with_clock<R, C>(
    capacity: usize,
    clock: C,
) -> Box<dyn AccessQueue<Arc<R>> + Send>
where
    R: PooledResource + Send + Sync + 'static,
    C: Clock + 'static,
{
    if capacity == 1 {
        Box::new(SingletonSlot::with_clock(clock))
    } else {
        Box::new(BoundedExpiryQueue::with_clock(capacity, clock))
    }
}
