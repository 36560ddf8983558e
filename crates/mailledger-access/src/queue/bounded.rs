//! Capacity-bounded, expiry-ordered connection queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{self, AtomicBool};

use super::AccessQueue;
use crate::resource::PooledResource;
use crate::time::{Clock, SystemClock};
use crate::{Error, Result};

/// Heap entry ordered so the earliest deadline sits at the top.
#[derive(Debug)]
struct Earliest<R>(R);

impl<R: PooledResource> PartialEq for Earliest<R> {
    fn eq(&self, other: &Self) -> bool {
        self.0.expires_at() == other.0.expires_at()
    }
}

impl<R: PooledResource> Eq for Earliest<R> {}

impl<R: PooledResource> PartialOrd for Earliest<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: PooledResource> Ord for Earliest<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.expires_at().cmp(&self.0.expires_at())
    }
}

/// A min-heap of pooled connections keyed by expiry deadline.
///
/// # Concurrency
///
/// The queue performs **no internal synchronization**. Mutating operations
/// take `&mut self`, so sharing one between threads means wrapping it in the
/// owner's lock (typically one queue per route, guarded by the route's
/// mutex). Only the deprecated flag is readable through `&self` from other
/// holders.
///
/// # Capacity
///
/// A capacity of 0 means unbounded. Otherwise [`offer`](Self::offer)
/// rejects once `len() == capacity`.
#[derive(Debug)]
pub struct BoundedExpiryQueue<R, C = SystemClock> {
    heap: BinaryHeap<Earliest<R>>,
    capacity: usize,
    deprecated: AtomicBool,
    clock: C,
}

impl<R: PooledResource> BoundedExpiryQueue<R> {
    /// Creates a queue holding at most `capacity` connections (0 = unbounded).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, SystemClock)
    }

    /// Creates a queue with no capacity limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(0)
    }
}

impl<R: PooledResource, C: Clock> BoundedExpiryQueue<R, C> {
    /// Creates a queue that reads the current time from `clock`.
    #[must_use]
    pub fn with_clock(capacity: usize, clock: C) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            deprecated: AtomicBool::new(false),
            clock,
        }
    }

    /// Maximum number of residents, or `None` if unbounded.
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        if self.capacity == 0 {
            None
        } else {
            Some(self.capacity)
        }
    }

    /// Number of parked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Free slots left, or `None` if unbounded.
    #[must_use]
    pub fn remaining_capacity(&self) -> Option<usize> {
        self.capacity().map(|cap| cap.saturating_sub(self.heap.len()))
    }

    /// Parks `resource` unless the queue is full.
    ///
    /// A full queue hands the resource back untouched so the caller can close
    /// it. Deprecation is not checked here.
    ///
    /// # Errors
    ///
    /// Returns the resource if the queue is at capacity.
    pub fn offer(&mut self, resource: R) -> std::result::Result<(), R> {
        if self.capacity != 0 && self.heap.len() >= self.capacity {
            tracing::trace!(capacity = self.capacity, "access queue full, rejecting offer");
            return Err(resource);
        }
        self.heap.push(Earliest(resource));
        Ok(())
    }

    /// Removes and returns the connection with the earliest deadline.
    pub fn poll(&mut self) -> Option<R> {
        self.heap.pop().map(|entry| entry.0)
    }

    /// Removes the earliest connection only if its deadline has passed.
    ///
    /// Returns `None` while the head is still within its lifetime, leaving
    /// the queue untouched.
    pub fn poll_delayed(&mut self) -> Option<R> {
        let head = self.heap.peek()?;
        if !self.clock.is_due(head.0.expires_at()) {
            return None;
        }
        self.poll()
    }

    /// Returns the connection with the earliest deadline without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&R> {
        self.heap.peek().map(|entry| &entry.0)
    }

    /// Like [`peek`](Self::peek), but an empty queue is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if nothing is parked.
    pub fn element(&self) -> Result<&R> {
        self.peek().ok_or(Error::Empty)
    }

    /// Like [`poll`](Self::poll), but an empty queue is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if nothing is parked.
    pub fn remove(&mut self) -> Result<R> {
        self.poll().ok_or(Error::Empty)
    }

    /// Keeps only the connections for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&R) -> bool) {
        self.heap.retain(|entry| keep(&entry.0));
    }

    /// Empties the queue, returning residents in deadline order.
    pub fn drain(&mut self) -> Vec<R> {
        let mut residents: Vec<R> = std::mem::take(&mut self.heap)
            .into_sorted_vec()
            .into_iter()
            .map(|entry| entry.0)
            .collect();
        // into_sorted_vec is ascending by heap order, i.e. latest deadline first.
        residents.reverse();
        residents
    }

    /// Flags the queue for retirement by its owner. Never reverts.
    pub fn mark_deprecated(&self) {
        self.deprecated.store(true, atomic::Ordering::Release);
    }

    /// Whether the queue has been flagged for retirement.
    #[must_use]
    pub fn is_deprecated(&self) -> bool {
        self.deprecated.load(atomic::Ordering::Acquire)
    }
}

impl<R: PooledResource, C: Clock> AccessQueue<R> for BoundedExpiryQueue<R, C> {
    fn offer(&mut self, resource: R) -> std::result::Result<(), R> {
        Self::offer(self, resource)
    }

    fn poll(&mut self) -> Option<R> {
        Self::poll(self)
    }

    fn poll_delayed(&mut self) -> Option<R> {
        Self::poll_delayed(self)
    }

    fn remove(&mut self) -> Result<R> {
        Self::remove(self)
    }

    fn retain(&mut self, keep: &mut dyn FnMut(&R) -> bool) {
        Self::retain(self, keep);
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn capacity(&self) -> Option<usize> {
        Self::capacity(self)
    }

    fn mark_deprecated(&self) {
        Self::mark_deprecated(self);
    }

    fn is_deprecated(&self) -> bool {
        Self::is_deprecated(self)
    }
}
