//! Shared wiring for this crate's tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_bootstrap::{AgentPayload, BootstrapExecutor, BootstrapSettings, SimulatedTransport};
use fleet_compute::{Instance, InstanceStatus, SimulatedCompute, fleet_selector};
use fleet_core::ControllerConfig;
use fleet_lifecycle::{LifecycleSettings, WorkerLifecycle};
use fleet_state::WorkerStore;

use crate::cloud::FleetController;

pub(crate) struct Fleet {
    pub compute: Arc<SimulatedCompute>,
    pub store: WorkerStore,
    pub lifecycle: WorkerLifecycle,
}

pub(crate) fn fleet() -> Fleet {
    let compute = Arc::new(SimulatedCompute::new());
    let store = WorkerStore::new();
    let executor = BootstrapExecutor::new(
        Arc::new(SimulatedTransport::new()),
        AgentPayload::new("agent.jar", b"agent".to_vec()),
        BootstrapSettings::default(),
    );
    let lifecycle = WorkerLifecycle::new(
        compute.clone(),
        executor,
        store.clone(),
        LifecycleSettings::default(),
    );
    Fleet {
        compute,
        store,
        lifecycle,
    }
}

impl Fleet {
    pub fn controller(&self, config: ControllerConfig) -> Arc<FleetController> {
        Arc::new(
            FleetController::new(config, self.compute.clone(), self.lifecycle.clone()).with_seed(7),
        )
    }
}

/// A running instance owned by `controller_id` with no local record.
pub(crate) fn remote_instance(name: &str, controller_id: &str) -> Instance {
    let mut labels: BTreeMap<String, String> = fleet_selector(controller_id);
    labels.insert(fleet_compute::CONFIG_LABEL.to_string(), "build".to_string());
    Instance {
        name: name.to_string(),
        zone: "us-central1-a".to_string(),
        status: InstanceStatus::Running,
        labels,
        internal_ip: Some("10.128.9.9".to_string()),
        external_ip: None,
        boot_disk: name.to_string(),
    }
}
