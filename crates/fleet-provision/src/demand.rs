//! Demand-driven provisioning loop.
//!
//! The scheduler is external: it reports queued jobs per label through a
//! [`DemandSource`], and the loop runs one provisioning round per label on
//! every tick.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fleet_core::LabelExpr;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::pending::PendingWorker;
use crate::strategy::{Decision, ProvisioningRequest, ProvisioningStrategy};

/// Where queued-job counts come from.
#[async_trait]
pub trait DemandSource: Send + Sync {
    /// Current queued jobs per requested label.
    async fn demand(&self) -> anyhow::Result<Vec<ProvisioningRequest>>;
}

/// Reads `{ "<label expression>": <queued jobs>, ... }` from a JSON file
/// written by the scheduler. An empty key stands for unlabeled jobs; a
/// missing file means no demand.
#[derive(Debug, Clone)]
pub struct JsonFileDemand {
    path: PathBuf,
}

impl JsonFileDemand {
    /// Read demand from `path` on every tick.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DemandSource for JsonFileDemand {
    async fn demand(&self) -> anyhow::Result<Vec<ProvisioningRequest>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            }
        };
        let queued: BTreeMap<String, u32> = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))?;

        // A bad key only costs its own label a round.
        Ok(queued
            .into_iter()
            .filter(|(_, jobs)| *jobs > 0)
            .filter_map(|(label, demand)| match LabelExpr::parse(&label) {
                Ok(label) => Some(ProvisioningRequest { label, demand }),
                Err(e) => {
                    warn!(label = %label, file = %self.path.display(), error = %e, "skipping malformed demand label");
                    None
                }
            })
            .collect())
    }
}

/// Runs provisioning rounds on a fixed interval until shutdown.
pub struct ProvisioningLoop {
    source: Arc<dyn DemandSource>,
    strategy: Arc<ProvisioningStrategy>,
    interval: Duration,
}

impl ProvisioningLoop {
    pub fn new(
        source: Arc<dyn DemandSource>,
        strategy: Arc<ProvisioningStrategy>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            strategy,
            interval,
        }
    }

    /// Run rounds every interval until `shutdown` flips. The first round runs
    /// immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "starting provisioning loop");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "provisioning tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("provisioning loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One round per label with outstanding demand. Returns the number of
    /// workers launched.
    pub async fn tick(&self) -> anyhow::Result<usize> {
        let requests = self.source.demand().await?;
        let mut launched = 0;

        for request in &requests {
            let outcome = self.strategy.apply(request).await;
            if outcome.decision == Decision::DeferToOthers {
                debug!(label = %request.label, demand = request.demand, available = outcome.available, "demand not covered this round");
            }
            launched += outcome.pending.len();
            for worker in outcome.pending {
                tokio::spawn(report(worker));
            }
        }
        Ok(launched)
    }
}

async fn report(worker: PendingWorker) {
    let name = worker.name.clone();
    let controller = worker.controller_id.clone();
    match worker.wait().await {
        Ok(ready) => debug!(worker = %name, %controller, address = %ready.address, "pending worker ready"),
        Err(e) => warn!(worker = %name, %controller, error = %e, "pending worker failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FleetRegistry;
    use crate::testing::fleet;
    use fleet_core::CapacityPolicy;
    use fleet_core::fixtures::{controller, template};

    #[tokio::test]
    async fn json_file_demand_parses_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demand.json");
        std::fs::write(&path, r#"{ "": 2, "build && linux": 3, "gpu": 0 }"#).unwrap();

        let demand = JsonFileDemand::new(&path).demand().await.unwrap();
        assert_eq!(
            demand,
            vec![
                ProvisioningRequest {
                    label: LabelExpr::Any,
                    demand: 2
                },
                ProvisioningRequest {
                    label: LabelExpr::parse("build && linux").unwrap(),
                    demand: 3
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_demand_file_is_no_demand() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFileDemand::new(dir.path().join("absent.json"));
        assert!(source.demand().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_label_skips_only_that_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demand.json");
        std::fs::write(&path, r#"{ "build &&": 4, "linux": 1 }"#).unwrap();

        let demand = JsonFileDemand::new(&path).demand().await.unwrap();
        assert_eq!(
            demand,
            vec![ProvisioningRequest {
                label: LabelExpr::parse("linux").unwrap(),
                demand: 1
            }]
        );
    }

    #[tokio::test]
    async fn malformed_demand_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demand.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(JsonFileDemand::new(&path).demand().await.is_err());
    }

    struct Fixed(Vec<ProvisioningRequest>);

    #[async_trait]
    impl DemandSource for Fixed {
        async fn demand(&self) -> anyhow::Result<Vec<ProvisioningRequest>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_provisions_until_shutdown() {
        let f = fleet();
        let registry = FleetRegistry::new();
        registry
            .register(f.controller(controller("c1", vec![template("build", "")])))
            .await
            .unwrap();
        let strategy = Arc::new(
            ProvisioningStrategy::new(registry, f.store.clone(), CapacityPolicy::CountLaunching)
                .with_seed(1),
        );
        let source = Arc::new(Fixed(vec![ProvisioningRequest {
            label: LabelExpr::Any,
            demand: 2,
        }]));
        let provisioning = Arc::new(ProvisioningLoop::new(source, strategy, Duration::from_secs(10)));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let provisioning = provisioning.clone();
            async move { provisioning.run(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        // Later ticks see the launched capacity and insert nothing more.
        assert_eq!(f.compute.insert_count(), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
