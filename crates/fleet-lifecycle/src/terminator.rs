//! Termination: optional boot-disk snapshot, then an async delete.

use std::sync::Arc;
use std::time::Duration;

use fleet_compute::{ComputeClient, label_value};
use fleet_state::{StateError, TerminationReason, WorkerRecord, WorkerState, WorkerStore};
use tracing::{debug, info, warn};

use crate::error::LifecycleResult;

/// Tears workers down. Cheap to clone.
#[derive(Clone)]
pub struct Terminator {
    compute: Arc<dyn ComputeClient>,
    store: WorkerStore,
    snapshot_timeout: Duration,
}

impl Terminator {
    /// Snapshots that outlast `snapshot_timeout` are abandoned.
    pub fn new(compute: Arc<dyn ComputeClient>, store: WorkerStore, snapshot_timeout: Duration) -> Self {
        Self {
            compute,
            store,
            snapshot_timeout,
        }
    }

    /// Terminate `worker` for `reason`.
    ///
    /// Returns `false` when the request was ignored because the worker is
    /// unknown or already terminating. The instance delete is issued and
    /// not waited for; the record is removed right after.
    pub async fn terminate(&self, worker: &str, reason: TerminationReason) -> LifecycleResult<bool> {
        match self
            .store
            .transition(worker, WorkerState::Terminating(reason))
            .await
        {
            Ok(_) => {}
            Err(StateError::InvalidTransition { from, .. }) => {
                debug!(worker, %from, %reason, "termination already in progress, ignoring");
                return Ok(false);
            }
            Err(StateError::NotFound(_)) => {
                debug!(worker, %reason, "termination of unknown worker ignored");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let Some(record) = self.store.get(worker).await else {
            return Ok(false);
        };
        info!(worker, %reason, controller = %record.controller_id, "terminating worker");

        if record.create_snapshot && record.last_task_failed {
            self.store.transition(worker, WorkerState::Snapshotting).await?;
            if let Err(e) = self.snapshot(&record).await {
                warn!(worker, error = %e, "snapshot failed, deleting anyway");
            }
        }

        match self
            .compute
            .terminate_instance_async(&record.project, &record.zone, worker)
            .await
        {
            Ok(op) => debug!(worker, operation = %op.id, "instance delete issued"),
            Err(e) if e.is_not_found() => debug!(worker, "instance already gone"),
            // Reconciliation picks up whatever survives a failed delete.
            Err(e) => warn!(worker, error = %e, "instance delete failed"),
        }

        self.store.transition(worker, WorkerState::Terminated).await?;
        self.store.remove(worker).await;
        Ok(true)
    }

    /// Replace any stale snapshot named after the worker with a fresh one
    /// of its boot disk.
    async fn snapshot(&self, record: &WorkerRecord) -> LifecycleResult<()> {
        let Some(instance) = self
            .compute
            .get_instance(&record.project, &record.zone, &record.name)
            .await?
        else {
            debug!(worker = %record.name, "instance gone, nothing to snapshot");
            return Ok(());
        };
        let name = label_value(&record.name);

        match self.compute.delete_snapshot(&record.project, &name).await {
            Ok(op) => {
                self.compute
                    .wait_for_operation(&record.project, &op, self.snapshot_timeout)
                    .await?;
                debug!(snapshot = %name, "stale snapshot deleted");
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let op = self
            .compute
            .create_snapshot(&record.project, &record.zone, &instance.boot_disk, &name)
            .await?;
        self.compute
            .wait_for_operation(&record.project, &op, self.snapshot_timeout)
            .await?;
        info!(worker = %record.name, snapshot = %name, disk = %instance.boot_disk, "boot disk snapshot created");
        Ok(())
    }
}
