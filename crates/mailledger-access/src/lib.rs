//! # mailledger-access
//!
//! Connection lifecycle plumbing shared by the IMAP and SMTP services.
//!
//! ## Features
//!
//! - **Access queues**: park idle connections per route, ordered by expiry
//!   deadline, with a bounded min-heap ([`BoundedExpiryQueue`]) and a
//!   lock-free single-connection slot ([`SingletonSlot`])
//! - **IDLE supervision**: a delay queue of active IDLE waits
//!   ([`IdleRegistry`]) and a supervisor that force-closes waits that
//!   overran their budget, either from a dedicated task or a periodic sweep
//! - **Deterministic time**: every container reads time through a
//!   [`Clock`](time::Clock) or tokio's clock, so tests never sleep for real
//!
//! ## Concurrency
//!
//! | Type | Discipline |
//! |------|------------|
//! | [`BoundedExpiryQueue`] | `&mut self`; owner serializes access |
//! | [`SingletonSlot`] | `&self`; compare-and-swap, never blocks |
//! | [`IdleRegistry`] | `&self`; mutex-guarded heap, `await_expired` is the only wait |
//!
//! ## Modules
//!
//! - [`queue`]: access queues
//! - [`resource`]: pooled connection handles
//! - [`idle`]: IDLE registry and supervisor
//! - [`time`]: clock abstraction

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod idle;
pub mod queue;
pub mod resource;
pub mod time;

pub use error::{Error, Result};
pub use idle::{
    BlockingHandle, IdleGuard, IdleRegistry, IdleSession, IdleTracker, Interrupt, Registration,
    SessionId, SupervisorConfig, SupervisorHandle,
};
pub use queue::{AccessQueue, BoundedExpiryQueue, SingletonSlot, access_queue};
pub use resource::{Pooled, PooledResource};
