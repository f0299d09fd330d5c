//! In-memory compute provider.
//!
//! Behaves like a small cloud project: inserts allocate addresses and
//! become `RUNNING` after a configurable boot delay, deletes remove the
//! instance, and operations finish after a configurable delay. Faults can
//! be switched on per call family, and every call is journaled so tests can
//! assert on what the fleet asked the provider to do.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::client::ComputeClient;
use crate::error::{ComputeError, ComputeResult};
use crate::types::{Instance, InstanceSpec, InstanceStatus, Operation};

/// One recorded call against the simulated provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeCall {
    Insert { name: String },
    Get { name: String },
    List,
    Terminate { name: String },
    WaitOperation { id: String },
    CreateSnapshot { name: String, disk: String },
    DeleteSnapshot { name: String },
    Catalog,
}

/// Call families that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Insert,
    Get,
    List,
    Terminate,
    Snapshot,
}

/// Regions, zones and shapes the simulated project offers.
#[derive(Debug, Clone)]
pub struct SimCatalog {
    pub regions: BTreeMap<String, Vec<String>>,
    pub machine_types: Vec<String>,
    pub networks: Vec<String>,
    pub instance_templates: Vec<String>,
}

impl Default for SimCatalog {
    fn default() -> Self {
        let zones = |region: &str, suffixes: &[&str]| {
            (
                region.to_string(),
                suffixes.iter().map(|s| format!("{region}-{s}")).collect(),
            )
        };
        Self {
            regions: BTreeMap::from([
                zones("us-central1", &["a", "b", "c", "f"]),
                zones("europe-west1", &["b", "c", "d"]),
            ]),
            machine_types: ["e2-medium", "n2-standard-2", "n2-standard-4", "n2-standard-8"]
                .into_iter()
                .map(String::from)
                .collect(),
            networks: vec!["default".to_string()],
            instance_templates: Vec::new(),
        }
    }
}

impl SimCatalog {
    fn has_zone(&self, zone: &str) -> bool {
        self.regions.values().any(|zones| zones.iter().any(|z| z == zone))
    }
}

struct SimInstance {
    project: String,
    instance: Instance,
    running_at: Instant,
}

struct SimOperation {
    ready_at: Instant,
    error: Option<String>,
}

#[derive(Default)]
struct SimState {
    instances: BTreeMap<String, SimInstance>,
    snapshots: BTreeMap<String, String>,
    operations: HashMap<String, SimOperation>,
    journal: Vec<ComputeCall>,
    faults: HashSet<Fault>,
    insert_operation_error: Option<String>,
    boot_delay: Duration,
    operation_delay: Duration,
    next_id: u64,
    catalog: SimCatalog,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn operation(&mut self, zone: Option<&str>, target: &str, error: Option<String>) -> Operation {
        let id = format!("operation-{}", self.next_id());
        self.operations.insert(
            id.clone(),
            SimOperation {
                ready_at: Instant::now() + self.operation_delay,
                error,
            },
        );
        Operation {
            id,
            zone: zone.map(String::from),
            target: target.to_string(),
        }
    }

    fn fault(&self, fault: Fault, what: &str) -> ComputeResult<()> {
        if self.faults.contains(&fault) {
            Err(ComputeError::Api(format!("simulated {what} failure")))
        } else {
            Ok(())
        }
    }
}

/// In-memory [`ComputeClient`].
#[derive(Default)]
pub struct SimulatedCompute {
    state: Mutex<SimState>,
}

impl SimulatedCompute {
    /// A provider with the default catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider serving `catalog` from its listing calls.
    pub fn with_catalog(catalog: SimCatalog) -> Self {
        let sim = Self::new();
        sim.state().catalog = catalog;
        sim
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Programming ────────────────────────────────────────────────

    /// Make every call of the `fault` family fail until disabled.
    pub fn set_fault(&self, fault: Fault, enabled: bool) {
        let mut state = self.state();
        if enabled {
            state.faults.insert(fault);
        } else {
            state.faults.remove(&fault);
        }
    }

    /// Time from insert until the instance reports `RUNNING`.
    pub fn set_boot_delay(&self, delay: Duration) {
        self.state().boot_delay = delay;
    }

    /// Time every new operation takes to finish.
    pub fn set_operation_delay(&self, delay: Duration) {
        self.state().operation_delay = delay;
    }

    /// Make subsequent insert operations finish with `error`.
    pub fn set_insert_operation_error(&self, error: Option<String>) {
        self.state().insert_operation_error = error;
    }

    /// Place an instance directly in the inventory, as if created by an
    /// earlier process.
    pub fn seed_instance(&self, project: &str, instance: Instance) {
        let mut state = self.state();
        state.instances.insert(
            instance.name.clone(),
            SimInstance {
                project: project.to_string(),
                instance,
                running_at: Instant::now(),
            },
        );
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ComputeCall> {
        self.state().journal.clone()
    }

    /// Names of instances a terminate was requested for, in call order.
    pub fn terminated(&self) -> Vec<String> {
        self.state()
            .journal
            .iter()
            .filter_map(|c| match c {
                ComputeCall::Terminate { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of insert calls made.
    pub fn insert_count(&self) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|c| matches!(c, ComputeCall::Insert { .. }))
            .count()
    }

    /// Instances that have not been deleted.
    pub fn instances(&self) -> Vec<Instance> {
        self.state()
            .instances
            .values()
            .map(|s| s.instance.clone())
            .collect()
    }

    /// Names of existing snapshots.
    pub fn snapshots(&self) -> Vec<String> {
        self.state().snapshots.keys().cloned().collect()
    }
}

#[async_trait]
impl ComputeClient for SimulatedCompute {
    async fn insert_instance(&self, project: &str, spec: &InstanceSpec) -> ComputeResult<Operation> {
        let mut state = self.state();
        state.journal.push(ComputeCall::Insert {
            name: spec.name.clone(),
        });
        state.fault(Fault::Insert, "insert")?;

        if !state.catalog.has_zone(&spec.zone) {
            return Err(ComputeError::Api(format!("unknown zone '{}'", spec.zone)));
        }
        if !state.catalog.machine_types.contains(&spec.machine_type) {
            return Err(ComputeError::Api(format!(
                "unknown machine type '{}'",
                spec.machine_type
            )));
        }
        if state.instances.contains_key(&spec.name) {
            return Err(ComputeError::Api(format!(
                "instance '{}' already exists",
                spec.name
            )));
        }

        let n = state.next_id();
        let instance = Instance {
            name: spec.name.clone(),
            zone: spec.zone.clone(),
            status: InstanceStatus::Provisioning,
            labels: spec.labels.clone(),
            internal_ip: Some(format!("10.128.{}.{}", n / 250, n % 250 + 2)),
            external_ip: spec
                .network
                .external_ip
                .then(|| format!("34.72.{}.{}", n / 250, n % 250 + 2)),
            boot_disk: spec.name.clone(),
        };
        let running_at = Instant::now() + state.boot_delay;
        state.instances.insert(
            spec.name.clone(),
            SimInstance {
                project: project.to_string(),
                instance,
                running_at,
            },
        );

        let error = state.insert_operation_error.clone();
        let op = state.operation(Some(&spec.zone), &spec.name, error);
        debug!(instance = %spec.name, zone = %spec.zone, "[SIM] instance inserted");
        Ok(op)
    }

    async fn get_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> ComputeResult<Option<Instance>> {
        let mut state = self.state();
        state.journal.push(ComputeCall::Get {
            name: name.to_string(),
        });
        state.fault(Fault::Get, "get")?;

        let now = Instant::now();
        Ok(state
            .instances
            .get_mut(name)
            .filter(|s| s.project == project && s.instance.zone == zone)
            .map(|s| {
                if s.instance.status == InstanceStatus::Provisioning && now >= s.running_at {
                    s.instance.status = InstanceStatus::Running;
                }
                s.instance.clone()
            }))
    }

    async fn list_instances_by_label(
        &self,
        project: &str,
        labels: &BTreeMap<String, String>,
    ) -> ComputeResult<Vec<Instance>> {
        let mut state = self.state();
        state.journal.push(ComputeCall::List);
        state.fault(Fault::List, "list")?;

        Ok(state
            .instances
            .values()
            .filter(|s| s.project == project)
            .filter(|s| {
                labels
                    .iter()
                    .all(|(k, v)| s.instance.labels.get(k) == Some(v))
            })
            .map(|s| s.instance.clone())
            .collect())
    }

    async fn terminate_instance_async(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> ComputeResult<Operation> {
        let mut state = self.state();
        state.journal.push(ComputeCall::Terminate {
            name: name.to_string(),
        });
        state.fault(Fault::Terminate, "terminate")?;

        let owned = state
            .instances
            .get(name)
            .is_some_and(|s| s.project == project && s.instance.zone == zone);
        if !owned {
            return Err(ComputeError::NotFound {
                kind: "instance",
                name: name.to_string(),
            });
        }
        state.instances.remove(name);
        debug!(instance = %name, "[SIM] instance deleted");
        Ok(state.operation(Some(zone), name, None))
    }

    async fn wait_for_operation(
        &self,
        _project: &str,
        operation: &Operation,
        timeout: Duration,
    ) -> ComputeResult<()> {
        let (ready_at, error) = {
            let mut state = self.state();
            state.journal.push(ComputeCall::WaitOperation {
                id: operation.id.clone(),
            });
            let op = state
                .operations
                .get(&operation.id)
                .ok_or_else(|| ComputeError::NotFound {
                    kind: "operation",
                    name: operation.id.clone(),
                })?;
            (op.ready_at, op.error.clone())
        };

        let remaining = ready_at.saturating_duration_since(Instant::now());
        if remaining > timeout {
            tokio::time::sleep(timeout).await;
            return Err(ComputeError::Timeout {
                operation: operation.id.clone(),
                timeout,
            });
        }
        tokio::time::sleep(remaining).await;

        match error {
            Some(reason) => Err(ComputeError::OperationFailed {
                operation: operation.id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn create_snapshot(
        &self,
        project: &str,
        zone: &str,
        disk: &str,
        snapshot: &str,
    ) -> ComputeResult<Operation> {
        let mut state = self.state();
        state.journal.push(ComputeCall::CreateSnapshot {
            name: snapshot.to_string(),
            disk: disk.to_string(),
        });
        state.fault(Fault::Snapshot, "snapshot")?;

        if state.snapshots.contains_key(snapshot) {
            return Err(ComputeError::Api(format!(
                "snapshot '{snapshot}' already exists"
            )));
        }
        state
            .snapshots
            .insert(snapshot.to_string(), project.to_string());
        Ok(state.operation(Some(zone), snapshot, None))
    }

    async fn delete_snapshot(&self, project: &str, snapshot: &str) -> ComputeResult<Operation> {
        let mut state = self.state();
        state.journal.push(ComputeCall::DeleteSnapshot {
            name: snapshot.to_string(),
        });
        state.fault(Fault::Snapshot, "snapshot")?;

        match state.snapshots.get(snapshot) {
            Some(owner) if owner == project => {
                state.snapshots.remove(snapshot);
                Ok(state.operation(None, snapshot, None))
            }
            _ => Err(ComputeError::NotFound {
                kind: "snapshot",
                name: snapshot.to_string(),
            }),
        }
    }

    async fn list_regions(&self, _project: &str) -> ComputeResult<Vec<String>> {
        let mut state = self.state();
        state.journal.push(ComputeCall::Catalog);
        Ok(state.catalog.regions.keys().cloned().collect())
    }

    async fn list_zones(&self, _project: &str, region: &str) -> ComputeResult<Vec<String>> {
        let mut state = self.state();
        state.journal.push(ComputeCall::Catalog);
        state
            .catalog
            .regions
            .get(region)
            .cloned()
            .ok_or_else(|| ComputeError::NotFound {
                kind: "region",
                name: region.to_string(),
            })
    }

    async fn list_machine_types(&self, _project: &str, zone: &str) -> ComputeResult<Vec<String>> {
        let mut state = self.state();
        state.journal.push(ComputeCall::Catalog);
        if !state.catalog.has_zone(zone) {
            return Err(ComputeError::NotFound {
                kind: "zone",
                name: zone.to_string(),
            });
        }
        Ok(state.catalog.machine_types.clone())
    }

    async fn list_networks(&self, _project: &str) -> ComputeResult<Vec<String>> {
        let mut state = self.state();
        state.journal.push(ComputeCall::Catalog);
        Ok(state.catalog.networks.clone())
    }

    async fn list_instance_templates(&self, _project: &str) -> ComputeResult<Vec<String>> {
        let mut state = self.state();
        state.journal.push(ComputeCall::Catalog);
        Ok(state.catalog.instance_templates.clone())
    }
}
