//! Orphan reconciliation sweep.

use std::time::Duration;

use async_trait::async_trait;
use fleet_compute::{InstanceStatus, fleet_selector};
use fleet_provision::{FleetController, FleetRegistry};
use tracing::{debug, info, warn};

use crate::periodic::PeriodicTask;

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub controllers: usize,
    /// Remote instances listed across all controllers.
    pub remote: usize,
    pub orphans_deleted: usize,
    pub skipped_stopping: usize,
    /// Listing or delete calls that failed.
    pub failures: usize,
}

/// Deletes remote instances labeled with a registered controller's fleet id
/// that have no local record.
pub struct OrphanReconciler {
    registry: FleetRegistry,
    interval: Duration,
}

impl OrphanReconciler {
    /// Sweep every controller in `registry` once per `interval`.
    pub fn new(registry: FleetRegistry, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// One pass over every registered controller.
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        for controller in self.registry.controllers().await {
            stats.controllers += 1;
            self.sweep_controller(&controller, &mut stats).await;
        }

        if stats.orphans_deleted > 0 || stats.failures > 0 {
            info!(
                controllers = stats.controllers,
                remote = stats.remote,
                orphans_deleted = stats.orphans_deleted,
                skipped_stopping = stats.skipped_stopping,
                failures = stats.failures,
                "reconciliation sweep done"
            );
        } else {
            debug!(controllers = stats.controllers, remote = stats.remote, "reconciliation sweep found no orphans");
        }
        stats
    }

    async fn sweep_controller(&self, controller: &FleetController, stats: &mut SweepStats) {
        let id = controller.id();
        let project = &controller.config().project;
        let compute = controller.compute();
        let store = controller.store();

        // Remote first: anything listed here had its record published
        // before its insert call, so the snapshot below already holds it.
        let remote = match compute
            .list_instances_by_label(project, &fleet_selector(id))
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                warn!(controller = %id, error = %e, "listing fleet instances failed");
                stats.failures += 1;
                return;
            }
        };
        stats.remote += remote.len();
        let local = store.names_for_controller(id).await;

        for instance in remote {
            if local.contains(&instance.name) {
                continue;
            }
            if instance.status == InstanceStatus::Stopping {
                debug!(controller = %id, instance = %instance.name, "orphan already stopping");
                stats.skipped_stopping += 1;
                continue;
            }
            if store.contains(&instance.name).await {
                debug!(controller = %id, instance = %instance.name, "record published during sweep, keeping");
                continue;
            }

            match compute
                .terminate_instance_async(project, &instance.zone, &instance.name)
                .await
            {
                Ok(_) => {
                    info!(
                        controller = %id,
                        instance = %instance.name,
                        status = %instance.status,
                        config = instance.config_name().unwrap_or("-"),
                        "deleted orphan instance"
                    );
                    stats.orphans_deleted += 1;
                }
                Err(e) if e.is_not_found() => {
                    debug!(controller = %id, instance = %instance.name, "orphan already gone");
                }
                Err(e) => {
                    warn!(controller = %id, instance = %instance.name, error = %e, "deleting orphan failed");
                    stats.failures += 1;
                }
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for OrphanReconciler {
    fn name(&self) -> &str {
        "orphan-reconciler"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn on_tick(&self) {
        self.sweep().await;
    }
}
