//! Lock-free single-connection slot.
//!
//! Used for routes that only ever keep one connection open (for instance a
//! provider that caps concurrent IMAP sessions at one per account). Every
//! mutation is a compare-and-swap on an [`ArcSwapOption`], so callers need no
//! external lock.
//!
//! # ABA
//!
//! [`poll_delayed`](SingletonSlot::poll_delayed) and
//! [`retain`](SingletonSlot::retain) read the occupant, decide, then swap it
//! out only if the slot still holds the *same allocation*. If that very `Arc`
//! is polled and re-offered by another caller in between, the swap succeeds
//! against the re-offered occupant. Occupants carry no version stamp, so this
//! is not detected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;

use super::AccessQueue;
use crate::resource::PooledResource;
use crate::time::{Clock, SystemClock};
use crate::{Error, Result};

/// A capacity-1 access queue safe for concurrent use.
///
/// At most one connection is resident at any instant. Residents are shared
/// as `Arc`s so a [`peek`](Self::peek) never blocks a concurrent
/// [`poll`](Self::poll).
#[derive(Debug)]
pub struct SingletonSlot<R, C = SystemClock> {
    cell: ArcSwapOption<R>,
    deprecated: AtomicBool,
    clock: C,
}

impl<R: PooledResource> SingletonSlot<R> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<R: PooledResource> Default for SingletonSlot<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether two observations of the cell refer to the same occupant.
fn same_occupant<R>(a: &Option<Arc<R>>, b: &Option<Arc<R>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<R: PooledResource, C: Clock> SingletonSlot<R, C> {
    /// Creates an empty slot that reads the current time from `clock`.
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self {
            cell: ArcSwapOption::empty(),
            deprecated: AtomicBool::new(false),
            clock,
        }
    }

    /// Parks `resource` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns the resource if the slot is already occupied.
    pub fn offer(&self, resource: Arc<R>) -> std::result::Result<(), Arc<R>> {
        let previous = self
            .cell
            .compare_and_swap(&None::<Arc<R>>, Some(Arc::clone(&resource)));
        if previous.is_none() {
            Ok(())
        } else {
            tracing::trace!("singleton slot occupied, rejecting offer");
            Err(resource)
        }
    }

    /// Alias of [`offer`](Self::offer).
    ///
    /// # Errors
    ///
    /// Returns the resource if the slot is already occupied.
    pub fn add(&self, resource: Arc<R>) -> std::result::Result<(), Arc<R>> {
        self.offer(resource)
    }

    /// Empties the slot, returning whatever was resident.
    pub fn poll(&self) -> Option<Arc<R>> {
        self.cell.swap(None)
    }

    /// Empties the slot only if the occupant's deadline has passed.
    ///
    /// If another caller takes or replaces the occupant between the check
    /// and the swap, this gives up and returns `None`. Only the caller whose
    /// swap lands ever receives a given occupant.
    pub fn poll_delayed(&self) -> Option<Arc<R>> {
        let current = self.cell.load_full();
        let resident = current.as_ref()?;
        if !self.clock.is_due(resident.expires_at()) {
            return None;
        }
        let observed = self.cell.compare_and_swap(&current, None::<Arc<R>>);
        if same_occupant(&observed, &current) {
            current
        } else {
            None
        }
    }

    /// Returns the occupant without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<Arc<R>> {
        self.cell.load_full()
    }

    /// Like [`peek`](Self::peek), but an empty slot is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if the slot is empty.
    pub fn element(&self) -> Result<Arc<R>> {
        self.peek().ok_or(Error::Empty)
    }

    /// Like [`poll`](Self::poll), but an empty slot is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Empty`] if the slot is empty.
    pub fn remove(&self) -> Result<Arc<R>> {
        self.poll().ok_or(Error::Empty)
    }

    /// Evicts the occupant if `keep` rejects it.
    ///
    /// Retries when the occupant changes underneath, so a replacement is
    /// judged too.
    pub fn retain(&self, mut keep: impl FnMut(&Arc<R>) -> bool) {
        let mut current = self.cell.load_full();
        loop {
            let Some(resident) = current.as_ref() else {
                return;
            };
            if keep(resident) {
                return;
            }
            let observed = self.cell.compare_and_swap(&current, None::<Arc<R>>);
            if same_occupant(&observed, &current) {
                return;
            }
            current = (*observed).clone();
        }
    }

    /// 1 if occupied, 0 otherwise.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.cell.load().is_some())
    }

    /// Returns `true` if the slot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cell.load().is_none()
    }

    /// Flags the slot for retirement by its owner. Never reverts.
    pub fn mark_deprecated(&self) {
        self.deprecated.store(true, Ordering::Release);
    }

    /// Whether the slot has been flagged for retirement.
    #[must_use]
    pub fn is_deprecated(&self) -> bool {
        self.deprecated.load(Ordering::Acquire)
    }
}

impl<R: PooledResource, C: Clock> AccessQueue<Arc<R>> for SingletonSlot<R, C> {
    fn offer(&mut self, resource: Arc<R>) -> std::result::Result<(), Arc<R>> {
        Self::offer(self, resource)
    }

    fn poll(&mut self) -> Option<Arc<R>> {
        Self::poll(self)
    }

    fn poll_delayed(&mut self) -> Option<Arc<R>> {
        Self::poll_delayed(self)
    }

    fn remove(&mut self) -> Result<Arc<R>> {
        Self::remove(self)
    }

    fn retain(&mut self, keep: &mut dyn FnMut(&Arc<R>) -> bool) {
        Self::retain(self, keep);
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn capacity(&self) -> Option<usize> {
        Some(1)
    }

    fn mark_deprecated(&self) {
        Self::mark_deprecated(self);
    }

    fn is_deprecated(&self) -> bool {
        Self::is_deprecated(self)
    }
}
