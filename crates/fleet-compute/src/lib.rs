//! fleet-compute — the cloud compute API boundary.
//!
//! The fleet never talks to a cloud SDK directly. Everything it needs from
//! the provider goes through [`ComputeClient`]: instance insert/get/list/
//! delete, long-running operation waits, boot-disk snapshots and the
//! read-only catalog listings used by `fleetd check-config --remote`.
//!
//! # Instance identity
//!
//! ```text
//! WorkerTemplate + name + controller id
//!   └── InstanceSpec::from_template()
//!         ├── label fleet-config = <template description>
//!         ├── label fleet-id     = <controller id>
//!         └── metadata fleet-labels, startup-script, template metadata
//! ```
//!
//! The two labels are the only durable identity an instance carries.
//! Reconciliation lists by `fleet-id`; capacity accounting after a restart
//! does the same.
//!
//! [`SimulatedCompute`] is an in-memory provider used by the daemon's
//! `simulated` backend and by tests across the workspace.

pub mod client;
pub mod error;
pub mod simulated;
pub mod types;

pub use client::ComputeClient;
pub use error::{ComputeError, ComputeResult};
pub use simulated::{ComputeCall, Fault, SimCatalog, SimulatedCompute};
pub use types::{
    CONFIG_LABEL, FLEET_ID_LABEL, Instance, InstanceSpec, InstanceStatus, Operation, label_value,
    fleet_selector,
};
