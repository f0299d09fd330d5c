//! Compute API error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for compute API calls.
pub type ComputeResult<T> = Result<T, ComputeError>;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("compute API error: {0}")]
    Api(String),

    #[error("operation {operation} failed: {reason}")]
    OperationFailed { operation: String, reason: String },

    #[error("operation {operation} did not finish within {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
}

impl ComputeError {
    /// True for a 404 from the provider.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
