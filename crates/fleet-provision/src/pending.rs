//! Handles to launches still in flight.

use std::sync::Arc;

use fleet_core::WorkerTemplate;
use fleet_lifecycle::{LifecycleError, LifecycleResult, WorkerReady};
use tokio::sync::oneshot;
use tracing::debug;

use crate::listener::ListenerSet;

/// A worker whose instance was inserted and whose launch is running.
///
/// Its record is already in the store, so capacity accounting sees it
/// before the launch resolves.
#[derive(Debug)]
pub struct PendingWorker {
    pub name: String,
    pub controller_id: String,
    pub template: Arc<WorkerTemplate>,
    pub executors: u32,
    ready: oneshot::Receiver<LifecycleResult<WorkerReady>>,
}

impl PendingWorker {
    /// Wrap the launch result receiver for `name`.
    pub fn new(
        name: impl Into<String>,
        controller_id: impl Into<String>,
        template: Arc<WorkerTemplate>,
        ready: oneshot::Receiver<LifecycleResult<WorkerReady>>,
    ) -> Self {
        Self {
            name: name.into(),
            controller_id: controller_id.into(),
            executors: template.executors,
            template,
            ready,
        }
    }

    /// Report the launch outcome to `listeners` as soon as it resolves,
    /// whether or not anyone waits on this handle.
    pub fn observed_by(self, listeners: ListenerSet) -> Self {
        if listeners.is_empty() {
            return self;
        }
        let (tx, rx) = oneshot::channel();
        let upstream = self.ready;
        let worker = self.name.clone();
        let controller = self.controller_id.clone();

        tokio::spawn(async move {
            let result = resolve(upstream, &worker).await;
            match &result {
                Ok(_) => listeners.complete(&controller, &worker),
                Err(e) => listeners.failure(&controller, &worker, &e.to_string()),
            }
            if tx.send(result).is_err() {
                debug!(%worker, "pending worker handle dropped");
            }
        });

        Self { ready: rx, ..self }
    }

    /// Wait for the launch to finish.
    pub async fn wait(self) -> LifecycleResult<WorkerReady> {
        resolve(self.ready, &self.name).await
    }
}

async fn resolve(
    ready: oneshot::Receiver<LifecycleResult<WorkerReady>>,
    worker: &str,
) -> LifecycleResult<WorkerReady> {
    ready.await.unwrap_or_else(|_| {
        Err(LifecycleError::Abandoned {
            worker: worker.to_string(),
        })
    })
}
