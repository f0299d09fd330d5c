//! Daemon wiring — builds the fleet from `fleet.toml` and runs it.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use fleet_bootstrap::{AgentPayload, BootstrapExecutor, BootstrapSettings, RemoteTransport, SimulatedTransport};
use fleet_compute::{ComputeClient, SimulatedCompute};
use fleet_core::{Backend, DaemonSettings, FleetConfig, WorkerTemplate};
use fleet_lifecycle::{LifecycleSettings, WorkerLifecycle};
use fleet_provision::{
    FleetController, FleetRegistry, JsonFileDemand, ListenerSet, ProvisioningListener,
    ProvisioningLoop, ProvisioningStrategy,
};
use fleet_reconcile::{OrphanReconciler, run_periodic};
use fleet_state::WorkerStore;
use tokio::sync::watch;
use tracing::{info, warn};

/// Agent file name used when no payload is configured.
const DEFAULT_AGENT_FILE: &str = "agent.jar";

/// Everything the daemon runs, wired together.
pub struct Fleet {
    pub registry: FleetRegistry,
    pub store: WorkerStore,
    pub lifecycle: WorkerLifecycle,
    pub strategy: Arc<ProvisioningStrategy>,
    pub reconciler: Arc<OrphanReconciler>,
}

impl Fleet {
    /// Register one controller per configured project on shared backends.
    pub async fn build(
        config: &FleetConfig,
        compute: Arc<dyn ComputeClient>,
        transport: Arc<dyn RemoteTransport>,
        payload: AgentPayload,
    ) -> anyhow::Result<Self> {
        let settings = &config.daemon;
        let store = WorkerStore::new();
        let executor = BootstrapExecutor::new(
            transport,
            payload,
            BootstrapSettings {
                retry_interval: settings.bootstrap_retry_interval,
                connect_timeout: settings.connect_timeout,
                ..BootstrapSettings::default()
            },
        );
        let lifecycle = WorkerLifecycle::new(
            compute.clone(),
            executor,
            store.clone(),
            LifecycleSettings {
                retention_check_interval: settings.retention_check_interval,
                snapshot_timeout: settings.snapshot_timeout,
                ..LifecycleSettings::default()
            },
        );

        let registry = FleetRegistry::new();
        for controller in &config.controllers {
            registry
                .register(Arc::new(FleetController::new(
                    controller.clone(),
                    compute.clone(),
                    lifecycle.clone(),
                )))
                .await?;
        }

        let strategy = Arc::new(
            ProvisioningStrategy::new(registry.clone(), store.clone(), settings.capacity_policy)
                .with_listeners(ListenerSet::new(vec![Arc::new(LogListener)])),
        );
        let reconciler = Arc::new(OrphanReconciler::new(
            registry.clone(),
            settings.reconcile_interval,
        ));

        Ok(Self {
            registry,
            store,
            lifecycle,
            strategy,
            reconciler,
        })
    }
}

/// Compute and remote-shell backends for `settings.backend`.
pub fn backends(settings: &DaemonSettings) -> (Arc<dyn ComputeClient>, Arc<dyn RemoteTransport>) {
    match settings.backend {
        Backend::Simulated => (
            Arc::new(SimulatedCompute::new()),
            Arc::new(SimulatedTransport::new()),
        ),
    }
}

/// Read the configured agent payload.
pub fn load_payload(settings: &DaemonSettings) -> anyhow::Result<AgentPayload> {
    let Some(path) = &settings.agent_payload else {
        warn!("no agent_payload configured, copying an empty {DEFAULT_AGENT_FILE}");
        return Ok(AgentPayload::new(DEFAULT_AGENT_FILE, Vec::new()));
    };
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading agent payload {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_AGENT_FILE.to_string());
    Ok(AgentPayload::new(file_name, bytes))
}

/// Run the daemon until Ctrl-C.
pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(
        config = %config_path.display(),
        controllers = config.controllers.len(),
        templates = config.template_count(),
        backend = ?config.daemon.backend,
        "fleet daemon starting"
    );

    let (compute, transport) = backends(&config.daemon);
    let payload = load_payload(&config.daemon)?;
    let fleet = Fleet::build(&config, compute, transport, payload).await?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let reconcile_handle = tokio::spawn(run_periodic(fleet.reconciler.clone(), shutdown_rx.clone()));

    let provision_handle = match &config.daemon.demand_file {
        Some(path) => {
            info!(path = %path.display(), "provisioning from demand file");
            let provisioning = ProvisioningLoop::new(
                Arc::new(JsonFileDemand::new(path)),
                fleet.strategy.clone(),
                config.daemon.provision_interval,
            );
            let shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move { provisioning.run(shutdown).await }))
        }
        None => {
            warn!("no demand_file configured, provisioning loop disabled");
            None
        }
    };

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = reconcile_handle.await;
    if let Some(handle) = provision_handle {
        let _ = handle.await;
    }
    fleet.lifecycle.shutdown().await;

    info!(workers = fleet.store.len().await, "fleet daemon stopped");
    Ok(())
}

/// Logs every provisioning event.
struct LogListener;

impl ProvisioningListener for LogListener {
    fn name(&self) -> &str {
        "log"
    }

    fn on_started(&self, controller: &str, template: &WorkerTemplate, workers: &[String]) {
        info!(%controller, template = %template.description, workers = ?workers, "launch started");
    }

    fn on_complete(&self, controller: &str, worker: &str) {
        info!(%controller, %worker, "worker ready");
    }

    fn on_failure(&self, controller: &str, worker: &str, error: &str) {
        warn!(%controller, %worker, %error, "worker launch failed");
    }
}
