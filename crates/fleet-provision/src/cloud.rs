//! FleetController — one cloud project and the workers launched into it.

use std::sync::{Arc, Mutex, PoisonError};

use fleet_compute::{ComputeClient, InstanceSpec, fleet_selector};
use fleet_core::{ControllerConfig, LabelExpr, WorkerTemplate};
use fleet_lifecycle::{LaunchRequest, WorkerLifecycle};
use fleet_state::{WorkerRecord, WorkerState, WorkerStore};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::matcher::select_template;
use crate::pending::PendingWorker;

/// What one controller will launch for a shortfall.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub template: Arc<WorkerTemplate>,
    pub instances: u32,
}

/// Provisions workers for one controller configuration.
pub struct FleetController {
    config: ControllerConfig,
    compute: Arc<dyn ComputeClient>,
    lifecycle: WorkerLifecycle,
    rng: Mutex<StdRng>,
}

impl FleetController {
    /// A controller for `config`, launching through `lifecycle`.
    pub fn new(
        config: ControllerConfig,
        compute: Arc<dyn ComputeClient>,
        lifecycle: WorkerLifecycle,
    ) -> Self {
        Self {
            config,
            compute,
            lifecycle,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Use a fixed seed for template selection and instance names.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Stable controller id, stamped on every instance as the fleet-id label.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Whether provisioning rounds may use this controller.
    pub fn fast_provisioning(&self) -> bool {
        self.config.fast_provisioning
    }

    /// Compute API client for this controller's project.
    pub fn compute(&self) -> &Arc<dyn ComputeClient> {
        &self.compute
    }

    pub fn store(&self) -> &WorkerStore {
        self.lifecycle.store()
    }

    /// Lifecycle that owns this controller's workers.
    pub fn lifecycle(&self) -> &WorkerLifecycle {
        &self.lifecycle
    }

    /// Whether any template can serve `label`.
    pub fn can_provision(&self, label: &LabelExpr) -> bool {
        self.config.templates.iter().any(|t| t.accepts(label))
    }

    /// Live instances owned by this controller: the larger of the local
    /// record count and the remote inventory carrying its fleet id.
    pub async fn live_instance_count(&self) -> ProvisionResult<u32> {
        let local = self.store().live_count(&self.config.id).await as u32;
        let remote = self
            .compute
            .list_instances_by_label(&self.config.project, &fleet_selector(&self.config.id))
            .await?
            .len() as u32;
        Ok(local.max(remote))
    }

    /// Choose a template for `label` and size the launch for `workload`
    /// executor slots, within the instance cap.
    pub async fn plan(&self, label: &LabelExpr, workload: u32) -> ProvisionResult<ProvisionPlan> {
        let template = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            select_template(&self.config.templates, label, &mut *rng)
        }
        .ok_or_else(|| ProvisionError::NoTemplate {
            controller: self.config.id.clone(),
            label: label.clone(),
        })?;

        let mut instances = template.instances_for(workload);

        if let Some(cap) = self.config.instance_cap {
            let live = self.live_instance_count().await?;
            let headroom = cap.saturating_sub(live);
            if headroom == 0 {
                return Err(ProvisionError::CapReached {
                    controller: self.config.id.clone(),
                    cap,
                });
            }
            if instances > headroom {
                debug!(controller = %self.config.id, wanted = instances, headroom, "limited by instance cap");
                instances = headroom;
            }
        }

        Ok(ProvisionPlan { template, instances })
    }

    /// Insert the planned instances and start their launches.
    ///
    /// Each record is published before its insert call, so concurrent
    /// rounds and the reconciliation sweep see it immediately. A failed
    /// insert discards its record. The call fails only if no instance
    /// could be inserted.
    pub async fn execute(&self, plan: &ProvisionPlan) -> ProvisionResult<Vec<PendingWorker>> {
        let template = &plan.template;
        let mut pending = Vec::with_capacity(plan.instances as usize);
        let mut last_error: Option<ProvisionError> = None;

        for _ in 0..plan.instances {
            match self.insert_one(template).await {
                Ok(worker) => pending.push(worker),
                Err(e) => {
                    warn!(controller = %self.config.id, template = %template.description, error = %e, "instance insert failed");
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            if pending.is_empty() {
                return Err(e);
            }
            warn!(
                controller = %self.config.id,
                requested = plan.instances,
                inserted = pending.len(),
                "partially provisioned"
            );
        }

        info!(
            controller = %self.config.id,
            template = %template.description,
            instances = pending.len(),
            executors = u32::try_from(pending.len())
                .unwrap_or(u32::MAX)
                .saturating_mul(template.executors),
            "provisioned workers"
        );
        Ok(pending)
    }

    /// `plan` followed by `execute`.
    pub async fn provision(&self, label: &LabelExpr, excess: u32) -> ProvisionResult<Vec<PendingWorker>> {
        let plan = self.plan(label, excess).await?;
        self.execute(&plan).await
    }

    async fn insert_one(&self, template: &Arc<WorkerTemplate>) -> ProvisionResult<PendingWorker> {
        let name = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            template.generate_instance_name(&mut *rng)
        };
        let store = self.store();
        let project = &self.config.project;

        store
            .insert(WorkerRecord::new(template, &name, &self.config.id, project))
            .await?;
        store.transition(&name, WorkerState::Inserting).await?;

        let spec = InstanceSpec::from_template(template, &name, &self.config.id);
        let operation = match self.compute.insert_instance(project, &spec).await {
            Ok(op) => op,
            Err(e) => {
                store.remove(&name).await;
                return Err(e.into());
            }
        };
        store.transition(&name, WorkerState::Launching).await?;
        debug!(worker = %name, operation = %operation.id, "insert accepted");

        let ready = self.lifecycle.spawn_launch(LaunchRequest {
            worker: name.clone(),
            project: project.clone(),
            template: template.clone(),
            operation,
        });
        Ok(PendingWorker::new(name, &self.config.id, template.clone(), ready))
    }
}

impl std::fmt::Debug for FleetController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetController")
            .field("id", &self.config.id)
            .field("name", &self.config.name)
            .field("templates", &self.config.templates.len())
            .finish()
    }
}

/// `true` when the error only means this controller has nothing to offer.
pub(crate) fn is_capacity_miss(e: &ProvisionError) -> bool {
    matches!(
        e,
        ProvisionError::NoTemplate { .. } | ProvisionError::CapReached { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fleet, remote_instance};
    use fleet_compute::{Fault, FLEET_ID_LABEL, CONFIG_LABEL};
    use fleet_core::fixtures::{controller, template};

    fn two_executor_template() -> WorkerTemplate {
        WorkerTemplate {
            executors: 2,
            ..template("linux", "build linux")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn provision_covers_shortfall_with_ceil_instances() {
        let f = fleet();
        let c = f.controller(controller("c1", vec![two_executor_template()]));

        let pending = c.provision(&LabelExpr::atom("build"), 3).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(f.compute.insert_count(), 2);
        assert_eq!(f.store.live_count("c1").await, 2);

        for p in pending {
            assert_eq!(p.executors, 2);
            assert_eq!(p.controller_id, "c1");
            let ready = p.wait().await.unwrap();
            assert_eq!(f.store.get(&ready.name).await.unwrap().state, WorkerState::Online);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn inserted_instances_carry_fleet_labels() {
        let f = fleet();
        let c = f.controller(controller("c1", vec![two_executor_template()]));
        c.provision(&LabelExpr::Any, 1).await.unwrap();

        let instance = &f.compute.instances()[0];
        assert!(instance.name.starts_with("linux-"));
        assert_eq!(instance.labels.get(FLEET_ID_LABEL).map(String::as_str), Some("c1"));
        assert_eq!(instance.labels.get(CONFIG_LABEL).map(String::as_str), Some("linux"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_insert_leaves_no_record() {
        let f = fleet();
        f.compute.set_fault(Fault::Insert, true);
        let c = f.controller(controller("c1", vec![template("build", "")]));

        let err = c.provision(&LabelExpr::Any, 2).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Compute(_)));
        assert!(f.store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn instance_cap_counts_remote_inventory() {
        let f = fleet();
        f.compute.seed_instance("ci-project", remote_instance("build-orphan1", "c1"));
        let mut cfg = controller("c1", vec![template("build", "")]);
        cfg.instance_cap = Some(3);
        let c = f.controller(cfg);

        assert_eq!(c.live_instance_count().await.unwrap(), 1);
        let plan = c.plan(&LabelExpr::Any, 5).await.unwrap();
        assert_eq!(plan.instances, 2);

        c.execute(&plan).await.unwrap();
        let err = c.plan(&LabelExpr::Any, 1).await.unwrap_err();
        assert!(matches!(err, ProvisionError::CapReached { cap: 3, .. }));
        assert!(is_capacity_miss(&err));
    }

    #[tokio::test]
    async fn unmatched_label_is_a_capacity_miss() {
        let f = fleet();
        let c = f.controller(controller("c1", vec![template("linux", "linux")]));

        assert!(c.can_provision(&LabelExpr::atom("linux")));
        assert!(!c.can_provision(&LabelExpr::atom("windows")));
        let err = c.plan(&LabelExpr::atom("windows"), 1).await.unwrap_err();
        assert!(is_capacity_miss(&err));
    }
}
