//! Supervision of long-running IMAP IDLE waits.
//!
//! A driver entering IDLE registers its session in an [`IdleRegistry`] with a
//! time budget and deregisters when the wait ends. A supervisor drains
//! registrations that overran their budget and force-closes the resource the
//! session is blocked on, so a silent server cannot pin a task forever.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailledger_access::idle::{self, IdleTracker, SupervisorConfig};
//!
//! # async fn run(wait: tokio::task::JoinHandle<()>) -> mailledger_access::Result<()> {
//! let (registry, supervisor) = idle::start(&SupervisorConfig::default())?;
//!
//! let session = Arc::new(IdleTracker::new());
//! let guard = registry.watch(session.clone(), Arc::new(wait.abort_handle()));
//! session.begin_wait();
//! let _ = wait.await;
//! if session.finish() {
//!     guard.finish();
//! }
//!
//! supervisor.shutdown().await
//! # }
//! ```

mod config;
mod interrupt;
mod registry;
mod session;
mod supervisor;

pub use config::{
    CancellationPolicy, DEFAULT_IDLE_TIMEOUT, SupervisorConfig, SupervisorConfigBuilder,
    SupervisorMode,
};
pub use interrupt::Interrupt;
pub use registry::{IdleGuard, IdleRegistry, Registration};
pub use session::{BlockingHandle, IdleSession, IdleState, IdleTracker, SessionId};
pub use supervisor::{
    SupervisorHandle, SweepStats, interrupt_expired, run_continuous, spawn, spawn_continuous,
    spawn_periodic, start, sweep,
};
