//! Provisioning error types.

use fleet_compute::ComputeError;
use fleet_core::LabelExpr;
use fleet_state::StateError;
use thiserror::Error;

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("controller {controller} has no template for '{label}'")]
    NoTemplate { controller: String, label: LabelExpr },

    #[error("controller {controller} is at its instance cap ({cap})")]
    CapReached { controller: String, cap: u32 },

    #[error("controller id '{0}' is already registered")]
    DuplicateController(String),
}
