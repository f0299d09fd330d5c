//! WorkerLifecycle — launch, job boundaries, retention and termination of
//! every worker, behind one handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_bootstrap::{BootstrapExecutor, RemoteTransport, Session};
use fleet_compute::ComputeClient;
use fleet_state::{TerminationReason, WorkerState, WorkerStore};
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::launcher::{LaunchRequest, Launcher, WorkerReady};
use crate::monitor::{RetentionCheck, RetentionMonitor};
use crate::preemption::{PreemptionCallback, PreemptionWatcher};
use crate::retention::{CompletionAction, policy_for};
use crate::task::{JobQueue, Outcome, TaskRef};
use crate::terminator::Terminator;

/// Timing knobs for the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// How often each online worker's retention policy is evaluated.
    pub retention_check_interval: Duration,
    /// Upper bound on a pre-delete disk snapshot.
    pub snapshot_timeout: Duration,
    /// Pause between instance status polls while launching.
    pub instance_poll_interval: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            retention_check_interval: Duration::from_secs(60),
            snapshot_timeout: Duration::from_secs(600),
            instance_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Owns every worker from insert acceptance to removal. Cheap to clone.
#[derive(Clone)]
pub struct WorkerLifecycle {
    store: WorkerStore,
    launcher: Launcher,
    terminator: Terminator,
    retention: RetentionMonitor,
    preemption: PreemptionWatcher,
    job_queue: Option<Arc<dyn JobQueue>>,
    /// Closes bootstrap sessions when their worker terminates.
    transport: Arc<dyn RemoteTransport>,
    /// Bootstrap session of every online worker, keyed by worker name.
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl WorkerLifecycle {
    /// Wire launcher, terminator, retention monitor and preemption watcher
    /// around `store`.
    pub fn new(
        compute: Arc<dyn ComputeClient>,
        executor: BootstrapExecutor,
        store: WorkerStore,
        settings: LifecycleSettings,
    ) -> Self {
        let terminator = Terminator::new(compute.clone(), store.clone(), settings.snapshot_timeout);
        let transport = executor.transport().clone();
        let preemption = PreemptionWatcher::new(transport.clone());
        let launcher = Launcher::new(
            compute,
            store.clone(),
            executor,
            terminator.clone(),
            settings.instance_poll_interval,
        );
        Self {
            store,
            launcher,
            terminator,
            retention: RetentionMonitor::new(settings.retention_check_interval),
            preemption,
            job_queue: None,
            transport,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Route resubmissions of problem runs to `queue`.
    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.job_queue = Some(queue);
        self
    }

    /// The record store this lifecycle writes to.
    pub fn store(&self) -> &WorkerStore {
        &self.store
    }

    // ── Launch ─────────────────────────────────────────────────────

    /// Launch and, on success, start retention monitoring and (for
    /// preemptible templates) the preemption watch.
    pub async fn launch(&self, request: LaunchRequest) -> LifecycleResult<WorkerReady> {
        let ready = self.launcher.launch(&request).await?;
        self.sessions
            .write()
            .await
            .insert(ready.name.clone(), ready.session.clone());

        self.retention
            .start_monitor(&ready.name, self.retention_check())
            .await;

        if request.template.preemptible {
            if let Err(e) = self
                .preemption
                .start_watch(
                    &ready.name,
                    &ready.session,
                    request.template.launch.method,
                    self.preemption_callback(),
                )
                .await
            {
                warn!(worker = %ready.name, error = %e, "could not start preemption watch");
            }
        }
        Ok(ready)
    }

    /// Launch on a background task; the receiver resolves with the result.
    pub fn spawn_launch(
        &self,
        request: LaunchRequest,
    ) -> oneshot::Receiver<LifecycleResult<WorkerReady>> {
        let (tx, rx) = oneshot::channel();
        let lifecycle = self.clone();
        tokio::spawn(async move {
            let worker = request.worker.clone();
            let result = lifecycle.launch(request).await;
            if tx.send(result).is_err() {
                debug!(%worker, "launch result dropped, nobody waiting");
            }
        });
        rx
    }

    // ── Job boundaries ─────────────────────────────────────────────

    /// The job queue assigned `task` to `worker`. Rejected unless the worker
    /// is online with an idle executor; a one-shot worker takes exactly one
    /// task over its lifetime.
    pub async fn task_accepted(&self, worker: &str, task: &TaskRef) -> LifecycleResult<()> {
        let err = self
            .store
            .update(worker, |r| {
                if r.state != WorkerState::Online {
                    return Some(LifecycleError::NotOnline {
                        worker: r.name.clone(),
                    });
                }
                let spent = r.one_shot && (r.completed_tasks > 0 || !r.running.is_empty());
                if spent || r.idle_executors() == 0 {
                    return Some(LifecycleError::NoFreeExecutor {
                        worker: r.name.clone(),
                    });
                }
                r.running.insert(task.id.clone());
                None
            })
            .await?;
        if let Some(err) = err {
            debug!(worker, %task, error = %err, "task refused");
            return Err(err);
        }
        debug!(worker, %task, "task accepted");
        Ok(())
    }

    /// `task` left `worker`. Applies the worker's retention policy, which
    /// may resubmit the run and/or start termination.
    pub async fn task_completed(
        &self,
        worker: &str,
        task: &TaskRef,
        outcome: Outcome,
    ) -> LifecycleResult<CompletionAction> {
        let now = Instant::now();
        let (record, outcome) = self
            .store
            .update(worker, |r| {
                r.running.remove(&task.id);
                r.completed_tasks += 1;
                if r.running.is_empty() {
                    r.idle_since = now;
                }
                // A job failing on a preempted worker was cut short by the
                // provider, not by itself.
                let outcome = match outcome {
                    Outcome::Failure if r.preempted => Outcome::Problem,
                    other => other,
                };
                r.last_task_failed = outcome != Outcome::Success;
                (r.clone(), outcome)
            })
            .await?;

        let action = policy_for(&record).on_task_completed(&record, task, outcome);
        debug!(worker, %task, ?outcome, ?action, "task completed");

        if let Some(retry) = &action.resubmit {
            match &self.job_queue {
                Some(queue) => match queue.resubmit(retry).await {
                    Ok(()) => info!(worker, task = %retry, "problem run resubmitted"),
                    Err(e) => warn!(worker, task = %retry, error = %e, "resubmission failed"),
                },
                None => warn!(worker, task = %retry, "no job queue attached, cannot resubmit"),
            }
        }
        if let Some(reason) = action.terminate {
            self.request_termination(worker, reason);
        }
        Ok(action)
    }

    // ── Retention ──────────────────────────────────────────────────

    /// Evaluate the worker's retention policy now. Returns the reason when
    /// termination was started.
    pub async fn check_retention(&self, worker: &str) -> Option<TerminationReason> {
        let record = self.store.get(worker).await?;
        if record.state != WorkerState::Online {
            return None;
        }
        let reason = policy_for(&record).check(&record, Instant::now())?;
        info!(worker, %reason, "retention policy fired");
        self.request_termination(worker, reason);
        Some(reason)
    }

    fn retention_check(&self) -> RetentionCheck {
        let lifecycle = self.clone();
        Arc::new(move |worker| {
            let lifecycle = lifecycle.clone();
            Box::pin(async move {
                if lifecycle.check_retention(&worker).await.is_some() {
                    return false;
                }
                lifecycle
                    .store
                    .get(&worker)
                    .await
                    .is_some_and(|r| r.state == WorkerState::Online)
            })
        })
    }

    fn preemption_callback(&self) -> PreemptionCallback {
        let lifecycle = self.clone();
        Arc::new(move |worker| {
            let lifecycle = lifecycle.clone();
            Box::pin(async move { lifecycle.mark_preempted(&worker).await })
        })
    }

    /// Record a preemption notice. An idle worker goes immediately; a busy
    /// one goes when its task completes.
    pub async fn mark_preempted(&self, worker: &str) {
        match self
            .store
            .update(worker, |r| {
                r.preempted = true;
                r.state == WorkerState::Online && r.is_idle()
            })
            .await
        {
            Ok(true) => {
                self.request_termination(worker, TerminationReason::Preempted);
            }
            Ok(false) => debug!(worker, "preempted worker still busy"),
            Err(e) => debug!(worker, error = %e, "preemption for unknown worker"),
        }
    }

    // ── Termination ────────────────────────────────────────────────

    /// Terminate and wait for the delete to be issued. The worker's
    /// bootstrap session is closed first.
    pub async fn terminate(&self, worker: &str, reason: TerminationReason) -> LifecycleResult<bool> {
        self.retention.stop_monitor(worker).await;
        self.preemption.stop_watch(worker).await;
        let session = self.sessions.write().await.remove(worker);
        if let Some(session) = session {
            self.transport.close(&session).await;
            debug!(worker, session = session.id, "bootstrap session closed");
        }
        self.terminator.terminate(worker, reason).await
    }

    /// Fire-and-forget termination.
    pub fn request_termination(&self, worker: &str, reason: TerminationReason) -> JoinHandle<()> {
        let lifecycle = self.clone();
        let worker = worker.to_string();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.terminate(&worker, reason).await {
                warn!(%worker, %reason, error = %e, "termination failed");
            }
        })
    }

    /// Stop all background monitors. Workers are left running.
    pub async fn shutdown(&self) {
        self.retention.stop_all().await;
        self.preemption.stop_all().await;
    }

    /// Whether `worker` still holds an open bootstrap session.
    pub async fn has_session(&self, worker: &str) -> bool {
        self.sessions.read().await.contains_key(worker)
    }

    /// Whether a retention timer is running for `worker`.
    pub async fn is_monitored(&self, worker: &str) -> bool {
        self.retention.is_monitoring(worker).await
    }

    /// Whether the preemption long-poll is active for `worker`.
    pub async fn is_watching_preemption(&self, worker: &str) -> bool {
        self.preemption.is_watching(worker).await
    }
}
