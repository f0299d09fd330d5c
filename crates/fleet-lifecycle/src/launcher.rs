//! Launcher — takes an inserted instance to a connected agent.

use std::sync::Arc;
use std::time::Duration;

use fleet_bootstrap::{BootstrapError, BootstrapExecutor, Channel, Session};
use fleet_compute::{ComputeClient, Instance, InstanceStatus, Operation};
use fleet_core::WorkerTemplate;
use fleet_state::{TerminationReason, WorkerState, WorkerStore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::terminator::Terminator;

/// An inserted instance waiting to be launched.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub worker: String,
    pub project: String,
    pub template: Arc<WorkerTemplate>,
    /// The accepted insert operation.
    pub operation: Operation,
}

/// A worker whose agent is running.
#[derive(Debug)]
pub struct WorkerReady {
    pub name: String,
    pub address: String,
    pub session: Session,
    /// The agent's streams, used as the worker's control channel.
    pub control: Channel,
}

/// Runs the launch sequence under the template's launch timeout.
#[derive(Clone)]
pub struct Launcher {
    compute: Arc<dyn ComputeClient>,
    store: WorkerStore,
    executor: BootstrapExecutor,
    terminator: Terminator,
    instance_poll_interval: Duration,
}

impl Launcher {
    pub fn new(
        compute: Arc<dyn ComputeClient>,
        store: WorkerStore,
        executor: BootstrapExecutor,
        terminator: Terminator,
        instance_poll_interval: Duration,
    ) -> Self {
        Self {
            compute,
            store,
            executor,
            terminator,
            instance_poll_interval,
        }
    }

    /// Launch the worker. On any failure, including the launch timeout, the
    /// instance is deleted and its record removed before returning.
    pub async fn launch(&self, request: &LaunchRequest) -> LifecycleResult<WorkerReady> {
        let started = Instant::now();
        let deadline = started + request.template.launch_timeout;

        let result = self.bring_up(request, deadline).await;

        match result {
            Ok(ready) => {
                let now = Instant::now();
                let address = ready.address.clone();
                self.store
                    .update(&request.worker, |r| {
                        r.address = Some(address);
                        r.idle_since = now;
                    })
                    .await?;
                self.store
                    .transition(&request.worker, WorkerState::Online)
                    .await?;
                info!(
                    worker = %request.worker,
                    address = %ready.address,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "worker online"
                );
                Ok(ready)
            }
            Err(e) => {
                warn!(worker = %request.worker, error = %e, "launch failed, deleting instance");
                if let Err(te) = self
                    .terminator
                    .terminate(&request.worker, TerminationReason::LaunchFailed)
                    .await
                {
                    warn!(worker = %request.worker, error = %te, "cleanup after failed launch failed");
                }
                Err(e)
            }
        }
    }

    /// Bootstrap gets the deadline itself rather than being dropped by an
    /// outer timeout, so a session opened late in the launch is closed.
    async fn bring_up(&self, request: &LaunchRequest, deadline: Instant) -> LifecycleResult<WorkerReady> {
        let template = &request.template;
        let timed_out = || LifecycleError::LaunchTimeout {
            worker: request.worker.clone(),
            timeout: template.launch_timeout,
        };

        let instance = tokio::time::timeout_at(deadline, async {
            self.compute
                .wait_for_operation(&request.project, &request.operation, template.launch_timeout)
                .await?;
            debug!(worker = %request.worker, operation = %request.operation.id, "insert operation done");
            self.wait_until_running(request).await
        })
        .await
        .map_err(|_| timed_out())??;

        let use_internal = template.network.use_internal_address;
        let address = instance
            .address(use_internal)
            .ok_or_else(|| LifecycleError::NoAddress {
                worker: request.worker.clone(),
                kind: if use_internal { "internal" } else { "external" },
            })?
            .to_string();

        let conn = self
            .executor
            .bootstrap(
                &request.worker,
                &address,
                &template.launch,
                template.wait_for_startup_script,
                deadline,
            )
            .await
            .map_err(|e| match e {
                BootstrapError::DeadlineExceeded => timed_out(),
                other => LifecycleError::Bootstrap(other),
            })?;

        Ok(WorkerReady {
            name: request.worker.clone(),
            address,
            session: conn.session,
            control: conn.channel,
        })
    }

    async fn wait_until_running(&self, request: &LaunchRequest) -> LifecycleResult<Instance> {
        let zone = &request.template.zone;
        loop {
            match self
                .compute
                .get_instance(&request.project, zone, &request.worker)
                .await
            {
                Ok(Some(instance)) => match instance.status {
                    InstanceStatus::Running => return Ok(instance),
                    InstanceStatus::Stopping
                    | InstanceStatus::Stopped
                    | InstanceStatus::Terminated
                    | InstanceStatus::Suspending
                    | InstanceStatus::Suspended => {
                        return Err(LifecycleError::InstanceGone {
                            worker: request.worker.clone(),
                            status: instance.status.to_string(),
                        });
                    }
                    status => debug!(worker = %request.worker, %status, "waiting for instance"),
                },
                Ok(None) => debug!(worker = %request.worker, "instance not visible yet"),
                Err(e) => debug!(worker = %request.worker, error = %e, "instance poll failed"),
            }
            tokio::time::sleep(self.instance_poll_interval).await;
        }
    }
}
