//! Preemption watcher for preemptible workers.
//!
//! A long-poll of the metadata server's `preempted` key runs on the worker
//! itself over a second channel of the bootstrap session. The first `TRUE`
//! line fires the callback; EOF or shutdown ends the watch quietly.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_bootstrap::{RemoteTransport, Session, preemption_watch_command};
use fleet_core::LaunchMethod;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::LifecycleResult;
use crate::monitor::BoxFuture;

/// Invoked with the worker name once preemption is announced.
pub type PreemptionCallback = Arc<dyn Fn(String) -> BoxFuture<()> + Send + Sync>;

struct WatchSlot {
    /// The task reading the long-poll output.
    handle: JoinHandle<()>,
    /// Flipped to `true` to end the task at its next await point.
    shutdown_tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct PreemptionWatcher {
    transport: Arc<dyn RemoteTransport>,
    watches: Arc<RwLock<HashMap<String, WatchSlot>>>,
}

impl PreemptionWatcher {
    /// Watches run over channels opened through `transport`.
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            watches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open the metadata long-poll on `session` and watch its output.
    pub async fn start_watch(
        &self,
        worker: &str,
        session: &Session,
        method: LaunchMethod,
        on_preempted: PreemptionCallback,
    ) -> LifecycleResult<()> {
        let channel = self
            .transport
            .open_channel(session, &preemption_watch_command(method))
            .await
            .map_err(fleet_bootstrap::BootstrapError::from)?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let name = worker.to_string();
        let watches = self.watches.clone();

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(channel.stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) if line.trim().eq_ignore_ascii_case("TRUE") => {
                            info!(worker = %name, "preemption announced");
                            on_preempted(name.clone()).await;
                            break;
                        }
                        Ok(Some(_)) => continue,
                        Ok(None) => {
                            debug!(worker = %name, "preemption watch channel closed");
                            break;
                        }
                        Err(e) => {
                            warn!(worker = %name, error = %e, "preemption watch read failed");
                            break;
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            watches.write().await.remove(&name);
        });

        let mut watches = self.watches.write().await;
        if let Some(old) = watches.insert(
            worker.to_string(),
            WatchSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
        debug!(worker, "preemption watch started");
        Ok(())
    }

    /// Stop watching `worker` without firing the callback.
    pub async fn stop_watch(&self, worker: &str) {
        let slot = self.watches.write().await.remove(worker);
        if let Some(slot) = slot {
            let _ = slot.shutdown_tx.send(true);
            debug!(worker, "preemption watch stopped");
        }
    }

    /// Stop every watch.
    pub async fn stop_all(&self) {
        let mut watches = self.watches.write().await;
        for (_, slot) in watches.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
        }
    }

    /// Whether a watch is active for `worker`.
    pub async fn is_watching(&self, worker: &str) -> bool {
        self.watches.read().await.contains_key(worker)
    }
}
