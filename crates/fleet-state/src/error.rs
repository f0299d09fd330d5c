//! Error types for the worker store.

use thiserror::Error;

use crate::types::WorkerState;

/// Result type alias for worker store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("worker not found: {0}")]
    NotFound(String),

    #[error("worker already registered: {0}")]
    AlreadyExists(String),

    #[error("worker {name}: illegal transition {from} → {to}")]
    InvalidTransition {
        name: String,
        from: WorkerState,
        to: WorkerState,
    },
}
