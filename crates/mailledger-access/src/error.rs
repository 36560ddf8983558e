//! Error types for the access layer.

use thiserror::Error;

/// Errors that can occur while managing pooled connections and IDLE sessions.
#[derive(Debug, Error)]
pub enum Error {
    /// `element()` or `remove()` was called on an empty container.
    #[error("container is empty")]
    Empty,

    /// A blocking wait was interrupted.
    #[error("wait interrupted")]
    Interrupted,

    /// I/O error while force-closing a blocking handle.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking handle failed to close for a non-I/O reason.
    ///
    /// Returned by [`BlockingHandle`](crate::BlockingHandle) implementations
    /// whose resource is not a socket, e.g. a mailbox folder handle.
    #[error("Close failed: {0}")]
    Close(String),

    /// A spawned supervisor task panicked or was aborted.
    #[error("Supervisor task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
