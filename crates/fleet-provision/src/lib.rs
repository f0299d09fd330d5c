//! fleet-provision — deciding how many workers to launch, and where.
//!
//! ```text
//! ProvisioningLoop (every provision_interval)
//!   └── DemandSource::demand() → [ProvisioningRequest { label, demand }]
//!         └── ProvisioningStrategy::apply()          one pass, never loops
//!               ├── FleetRegistry::capable(label)    shuffled
//!               ├── FleetController::plan()
//!               │     ├── matcher::select_template() random among matches
//!               │     └── ⌈workload / executors⌉, capped by instance_cap
//!               ├── ListenerSet::check()             veto → next controller
//!               ├── FleetController::execute()
//!               │     ├── publish record (Requested → Inserting)
//!               │     ├── ComputeClient::insert_instance()
//!               │     └── WorkerLifecycle::spawn_launch() → PendingWorker
//!               └── available += executors; stop when demand is met
//! ```
//!
//! A failure on one controller is logged and the round carries on with the
//! next. The round reports [`Decision::Complete`] when capacity covers the
//! demand and [`Decision::DeferToOthers`] otherwise.

pub mod cloud;
pub mod demand;
pub mod error;
pub mod listener;
pub mod matcher;
pub mod pending;
pub mod registry;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use cloud::{FleetController, ProvisionPlan};
pub use demand::{DemandSource, JsonFileDemand, ProvisioningLoop};
pub use error::{ProvisionError, ProvisionResult};
pub use listener::{ListenerSet, ProvisioningListener, Veto};
pub use matcher::{matching_templates, select_template};
pub use pending::PendingWorker;
pub use registry::FleetRegistry;
pub use strategy::{Decision, ProvisioningRequest, ProvisioningStrategy, RoundOutcome};
