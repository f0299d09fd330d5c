//! Lifecycle error types.

use std::time::Duration;

use fleet_bootstrap::BootstrapError;
use fleet_compute::ComputeError;
use fleet_state::StateError;
use thiserror::Error;

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("worker {worker} did not come online within {timeout:?}")]
    LaunchTimeout { worker: String, timeout: Duration },

    #[error("instance {worker} went away during launch (status {status})")]
    InstanceGone { worker: String, status: String },

    #[error("instance {worker} has no {kind} address")]
    NoAddress { worker: String, kind: &'static str },

    #[error("worker {worker} is not online")]
    NotOnline { worker: String },

    /// Every executor is busy, or a one-shot worker already had its job.
    #[error("worker {worker} has no free executor")]
    NoFreeExecutor { worker: String },

    #[error("launch of {worker} was abandoned before it reported back")]
    Abandoned { worker: String },
}
