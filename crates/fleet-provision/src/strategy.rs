//! The provisioning round.
//!
//! One pass per call, never looping:
//!
//! 1. capable controllers, shuffled
//! 2. skip controllers without fast provisioning
//! 3. plan `demand - available` on the controller
//! 4. listener veto → next controller
//! 5. execute, notify `started`, credit the new executors
//! 6. stop once `available >= demand`
//!
//! Any failure of one controller is logged and the round moves on.

use std::sync::{Mutex, PoisonError};

use fleet_core::{CapacityPolicy, LabelExpr};
use fleet_state::WorkerStore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::cloud::is_capacity_miss;
use crate::listener::ListenerSet;
use crate::pending::PendingWorker;
use crate::registry::FleetRegistry;

/// Jobs waiting for a label. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub label: LabelExpr,
    /// Executor slots wanted for the label.
    pub demand: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Available capacity now covers the demand.
    Complete,
    /// This round could not cover the demand; another strategy (or a later
    /// round) has to.
    DeferToOthers,
}

/// Result of one round.
#[derive(Debug)]
pub struct RoundOutcome {
    pub decision: Decision,
    /// Capacity available after the round, including launches just started.
    pub available: u32,
    pub pending: Vec<PendingWorker>,
}

impl RoundOutcome {
    fn new(decision: Decision, available: u32, pending: Vec<PendingWorker>) -> Self {
        Self {
            decision,
            available,
            pending,
        }
    }
}

/// Runs single-pass provisioning rounds across the registered controllers.
pub struct ProvisioningStrategy {
    registry: FleetRegistry,
    store: WorkerStore,
    listeners: ListenerSet,
    policy: CapacityPolicy,
    rng: Mutex<StdRng>,
}

impl ProvisioningStrategy {
    /// A strategy with no listeners and an entropy-seeded shuffle.
    pub fn new(registry: FleetRegistry, store: WorkerStore, policy: CapacityPolicy) -> Self {
        Self {
            registry,
            store,
            listeners: ListenerSet::default(),
            policy,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Consult and notify `listeners` on every round.
    pub fn with_listeners(mut self, listeners: ListenerSet) -> Self {
        self.listeners = listeners;
        self
    }

    /// Use a fixed seed for the controller shuffle.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// The controllers this strategy provisions from.
    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    /// Run one provisioning round for `request`.
    pub async fn apply(&self, request: &ProvisioningRequest) -> RoundOutcome {
        let label = &request.label;
        let demand = request.demand;

        let mut controllers = self.registry.capable(label).await;
        if controllers.is_empty() {
            debug!(%label, "no controller can provision this label");
            return RoundOutcome::new(Decision::DeferToOthers, 0, Vec::new());
        }
        controllers.shuffle(&mut *self.rng.lock().unwrap_or_else(PoisonError::into_inner));

        let mut available = self.store.available_executors(label, self.policy).await;
        let mut pending = Vec::new();

        for controller in controllers {
            if available >= demand {
                break;
            }
            if !controller.fast_provisioning() {
                debug!(controller = %controller.id(), "fast provisioning disabled, skipping");
                continue;
            }

            let workload = demand - available;
            let plan = match controller.plan(label, workload).await {
                Ok(plan) if plan.instances > 0 => plan,
                Ok(_) => continue,
                Err(e) if is_capacity_miss(&e) => {
                    debug!(controller = %controller.id(), reason = %e, "controller cannot supply capacity");
                    continue;
                }
                Err(e) => {
                    warn!(controller = %controller.id(), error = %e, "planning failed");
                    continue;
                }
            };

            if let Some(veto) = self
                .listeners
                .check(controller.id(), &plan.template, plan.instances)
            {
                info!(
                    controller = %controller.id(),
                    listener = %veto.listener,
                    reason = %veto.reason,
                    "provisioning vetoed"
                );
                continue;
            }

            let launched = match controller.execute(&plan).await {
                Ok(launched) => launched,
                Err(e) => {
                    warn!(controller = %controller.id(), error = %e, "provisioning failed");
                    continue;
                }
            };

            let names: Vec<String> = launched.iter().map(|p| p.name.clone()).collect();
            self.listeners
                .started(controller.id(), &plan.template, &names);

            available = launched
                .iter()
                .map(|p| p.executors)
                .fold(available, u32::saturating_add);
            pending.extend(
                launched
                    .into_iter()
                    .map(|p| p.observed_by(self.listeners.clone())),
            );
        }

        let decision = if available >= demand {
            Decision::Complete
        } else {
            Decision::DeferToOthers
        };
        info!(
            %label,
            demand,
            available,
            launched = pending.len(),
            ?decision,
            "provisioning round done"
        );
        RoundOutcome::new(decision, available, pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ProvisioningListener;
    use crate::testing::{Fleet, fleet};
    use fleet_compute::{CONFIG_LABEL, Fault, FLEET_ID_LABEL};
    use fleet_core::fixtures::{controller, one_shot_template, template};
    use fleet_core::{ControllerConfig, WorkerTemplate};
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn strategy(f: &Fleet, controllers: Vec<ControllerConfig>) -> ProvisioningStrategy {
        let registry = FleetRegistry::new();
        for c in controllers {
            registry.register(f.controller(c)).await.unwrap();
        }
        ProvisioningStrategy::new(registry, f.store.clone(), CapacityPolicy::CountLaunching)
            .with_seed(3)
    }

    fn request(label: &str, demand: u32) -> ProvisioningRequest {
        ProvisioningRequest {
            label: LabelExpr::parse(label).unwrap(),
            demand,
        }
    }

    fn by_controller(f: &Fleet) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for i in f.compute.instances() {
            *counts.entry(i.labels[FLEET_ID_LABEL].clone()).or_default() += 1;
        }
        counts
    }

    #[tokio::test(start_paused = true)]
    async fn two_capable_clouds_provision_exactly_the_shortfall() {
        let f = fleet();
        let s = strategy(
            &f,
            vec![
                controller("east", vec![one_shot_template("T1", "build")]),
                controller("west", vec![one_shot_template("T1", "build")]),
            ],
        )
        .await;

        let outcome = s.apply(&request("build", 2)).await;
        assert_eq!(outcome.decision, Decision::Complete);
        assert_eq!(outcome.pending.len(), 2);
        assert_eq!(outcome.available, 2);

        // The first capable cloud covers the whole shortfall.
        let counts = by_controller(&f);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.values().sum::<usize>(), 2);
        for instance in f.compute.instances() {
            assert_eq!(instance.labels[CONFIG_LABEL], "t1");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_cloud_falls_through_to_the_next() {
        let f = fleet();
        let broken = controller(
            "broken",
            vec![WorkerTemplate {
                machine_type: "no-such-shape".to_string(),
                ..template("build", "build")
            }],
        );
        let s = strategy(
            &f,
            vec![broken, controller("ok", vec![template("build", "build")])],
        )
        .await;

        let outcome = s.apply(&request("build", 1)).await;
        assert_eq!(outcome.decision, Decision::Complete);
        assert_eq!(by_controller(&f).get("ok"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn insert_failure_everywhere_defers() {
        let f = fleet();
        f.compute.set_fault(Fault::Insert, true);
        let s = strategy(&f, vec![controller("c1", vec![template("build", "")])]).await;

        let outcome = s.apply(&request("", 2)).await;
        assert_eq!(outcome.decision, Decision::DeferToOthers);
        assert!(outcome.pending.is_empty());
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn no_controllers_defers() {
        let f = fleet();
        let s = strategy(&f, vec![]).await;
        let outcome = s.apply(&request("build", 1)).await;
        assert_eq!(outcome.decision, Decision::DeferToOthers);
        assert_eq!(f.compute.insert_count(), 0);
    }

    #[tokio::test]
    async fn unmatched_label_defers() {
        let f = fleet();
        let s = strategy(&f, vec![controller("c1", vec![template("linux", "linux")])]).await;
        let outcome = s.apply(&request("windows", 1)).await;
        assert_eq!(outcome.decision, Decision::DeferToOthers);
        assert_eq!(f.compute.insert_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn launching_capacity_prevents_a_second_launch() {
        let f = fleet();
        let s = strategy(&f, vec![controller("c1", vec![template("build", "build")])]).await;

        let first = s.apply(&request("build", 2)).await;
        assert_eq!(first.pending.len(), 2);

        let second = s.apply(&request("build", 2)).await;
        assert_eq!(second.decision, Decision::Complete);
        assert!(second.pending.is_empty());
        assert_eq!(f.compute.insert_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ceil_bound_per_template() {
        let f = fleet();
        let t = WorkerTemplate {
            executors: 4,
            ..template("wide", "build")
        };
        let s = strategy(&f, vec![controller("c1", vec![t])]).await;

        let outcome = s.apply(&request("build", 9)).await;
        assert_eq!(outcome.pending.len(), 3);
        assert_eq!(outcome.available, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_executor_counts_saturate() {
        let f = fleet();
        let t = WorkerTemplate {
            executors: 1 << 31,
            ..template("huge", "build")
        };
        let s = strategy(&f, vec![controller("c1", vec![t])]).await;

        let outcome = s.apply(&request("build", u32::MAX)).await;
        assert_eq!(outcome.pending.len(), 2);
        assert_eq!(outcome.available, u32::MAX);
        assert_eq!(outcome.decision, Decision::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_controllers_are_skipped() {
        let f = fleet();
        let mut slow = controller("slow", vec![template("build", "")]);
        slow.fast_provisioning = false;
        let s = strategy(&f, vec![slow]).await;

        let outcome = s.apply(&request("", 1)).await;
        assert_eq!(outcome.decision, Decision::DeferToOthers);
        assert_eq!(f.compute.insert_count(), 0);
    }

    struct Deny;

    impl ProvisioningListener for Deny {
        fn name(&self) -> &str {
            "deny-east"
        }
        fn on_check(&self, controller: &str, _: &WorkerTemplate, _: u32) -> Result<(), String> {
            if controller == "east" {
                Err("budget exhausted".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn veto_skips_only_that_controller() {
        let f = fleet();
        let s = strategy(
            &f,
            vec![
                controller("east", vec![template("build", "")]),
                controller("west", vec![template("build", "")]),
            ],
        )
        .await
        .with_listeners(ListenerSet::new(vec![Arc::new(Deny)]));

        let outcome = s.apply(&request("", 3)).await;
        assert_eq!(outcome.decision, Decision::Complete);
        let counts = by_controller(&f);
        assert_eq!(counts.get("west"), Some(&3));
        assert_eq!(counts.get("east"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_workers_come_online() {
        let f = fleet();
        let s = strategy(&f, vec![controller("c1", vec![template("build", "")])]).await;

        let outcome = s.apply(&request("", 2)).await;
        for p in outcome.pending {
            let ready = p.wait().await.unwrap();
            assert!(f.lifecycle.is_monitored(&ready.name).await);
        }
        assert_eq!(
            f.store
                .available_executors(&LabelExpr::Any, CapacityPolicy::OnlineOnly)
                .await,
            2
        );
    }
}
