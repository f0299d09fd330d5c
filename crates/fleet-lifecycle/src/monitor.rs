//! One retention timer task per online worker.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Invoked on every tick with the worker name. Returns `false` once the
/// worker no longer needs watching.
pub type RetentionCheck = Arc<dyn Fn(String) -> BoxFuture<bool> + Send + Sync>;

struct MonitorSlot {
    /// The timer task.
    handle: JoinHandle<()>,
    /// Flipped to `true` to end the task at its next await point.
    shutdown_tx: watch::Sender<bool>,
}

/// Runs a periodic retention check for every online worker.
#[derive(Clone)]
pub struct RetentionMonitor {
    interval: Duration,
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
}

impl RetentionMonitor {
    /// Check every worker once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the timer for `worker`. The first check runs one interval in.
    pub async fn start_monitor(&self, worker: &str, check: RetentionCheck) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let name = worker.to_string();
        let interval = self.interval;
        let monitors = self.monitors.clone();

        let handle = tokio::spawn(async move {
            run_retention_loop(&name, interval, check, shutdown_rx).await;
            monitors.write().await.remove(&name);
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            worker.to_string(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        debug!(worker, interval_secs = interval.as_secs(), "retention monitor started");
    }

    /// Stop the timer for `worker`.
    pub async fn stop_monitor(&self, worker: &str) {
        let slot = self.monitors.write().await.remove(worker);
        if let Some(slot) = slot {
            let _ = slot.shutdown_tx.send(true);
            debug!(worker, "retention monitor stopped");
        }
    }

    /// Stop every timer.
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (_, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
        }
        info!("all retention monitors stopped");
    }

    /// Whether a timer is running for `worker`.
    pub async fn is_monitoring(&self, worker: &str) -> bool {
        self.monitors.read().await.contains_key(worker)
    }
}

async fn run_retention_loop(
    worker: &str,
    interval: Duration,
    check: RetentionCheck,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if !check(worker.to_string()).await {
                    debug!(worker, "retention loop done");
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(worker, "retention loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_check(counter: Arc<AtomicU32>, stop_after: u32) -> RetentionCheck {
        Arc::new(move |_worker| {
            let counter = counter.clone();
            Box::pin(async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < stop_after })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn checks_every_interval_until_told_to_stop() {
        let monitor = RetentionMonitor::new(Duration::from_secs(60));
        let ticks = Arc::new(AtomicU32::new(0));
        monitor.start_monitor("w1", counting_check(ticks.clone(), 3)).await;
        assert!(monitor.is_monitoring("w1").await);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!monitor.is_monitoring("w1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_monitor_halts_checks() {
        let monitor = RetentionMonitor::new(Duration::from_secs(60));
        let ticks = Arc::new(AtomicU32::new(0));
        monitor.start_monitor("w1", counting_check(ticks.clone(), u32::MAX)).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        monitor.stop_monitor("w1").await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_monitoring("w1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_clears_every_monitor() {
        let monitor = RetentionMonitor::new(Duration::from_secs(60));
        for w in ["a", "b", "c"] {
            monitor
                .start_monitor(w, counting_check(Arc::new(AtomicU32::new(0)), u32::MAX))
                .await;
        }
        assert!(monitor.is_monitoring("b").await);
        monitor.stop_all().await;
        for w in ["a", "b", "c"] {
            assert!(!monitor.is_monitoring(w).await);
        }
    }
}
