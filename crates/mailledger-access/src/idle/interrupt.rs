//! Cooperative interrupt flag for blocking waits.
//!
//! Mirrors a thread's interrupt status: setting it wakes any wait that is
//! watching it, and the interrupted wait clears it when it gives up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    raised: AtomicBool,
    notify: Notify,
}

/// A resettable, clonable interrupt flag.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Interrupt {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag and wakes every task waiting on it.
    pub fn interrupt(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether the flag is raised.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Lowers the flag, returning whether it was raised.
    pub fn clear(&self) -> bool {
        self.inner.raised.swap(false, Ordering::SeqCst)
    }

    /// Resolves once the flag is raised.
    pub async fn interrupted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[test]
    fn test_clear_reports_previous_state() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.clear());

        interrupt.interrupt();
        assert!(interrupt.is_interrupted());
        assert!(interrupt.clear());
        assert!(!interrupt.is_interrupted());
    }

    #[test]
    fn test_interrupted_wakes_on_raise() {
        let interrupt = Interrupt::new();
        let remote = interrupt.clone();
        let mut wait = task::spawn(async move { interrupt.interrupted().await });

        assert_pending!(wait.poll());
        remote.interrupt();
        assert!(wait.is_woken());
        assert_ready!(wait.poll());
    }

    #[test]
    fn test_interrupted_ready_when_already_raised() {
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        let mut wait = task::spawn(interrupt.interrupted());
        assert_ready!(wait.poll());
    }
}
