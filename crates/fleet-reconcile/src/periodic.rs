//! Periodic work driven by a fixed timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// One pass. Failures are handled and logged by the task itself.
    async fn on_tick(&self);
}

/// Drive `task` until `shutdown` flips to `true`. The first pass runs one
/// interval after start.
pub async fn run_periodic(task: Arc<dyn PeriodicTask>, mut shutdown: watch::Receiver<bool>) {
    info!(task = task.name(), interval_secs = task.interval().as_secs(), "periodic task started");

    let mut interval = tokio::time::interval(task.interval());
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                debug!(task = task.name(), "tick");
                task.on_tick().await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(task = task.name(), "periodic task shutting down");
                    break;
                }
            }
        }
    }
}
