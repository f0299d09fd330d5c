//! Bootstrap and transport error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures reported by a [`RemoteTransport`](crate::RemoteTransport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("session closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the bootstrap protocol.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("`{command}` exited with {code}")]
    CommandFailed { command: String, code: i32 },

    /// The caller's launch deadline passed before the agent was running.
    #[error("bootstrap deadline exceeded")]
    DeadlineExceeded,
}
