//! End-to-end fleet scenarios on the simulated backends: provisioning
//! rounds, launch, job boundaries, retention, preemption and orphan
//! reconciliation working together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_bootstrap::{AgentPayload, BootstrapExecutor, BootstrapSettings, HostBehavior, SimulatedTransport};
use fleet_compute::{CONFIG_LABEL, FLEET_ID_LABEL, Instance, InstanceStatus, SimulatedCompute, fleet_selector};
use fleet_core::fixtures::{controller, one_shot_template, template};
use fleet_core::{CapacityPolicy, ControllerConfig, LabelExpr, WorkerTemplate};
use fleet_lifecycle::{JobQueue, LifecycleError, LifecycleSettings, Outcome, TaskRef, WorkerLifecycle};
use fleet_provision::{
    Decision, FleetController, FleetRegistry, ProvisioningRequest, ProvisioningStrategy,
};
use fleet_reconcile::OrphanReconciler;
use fleet_state::{WorkerState, WorkerStore};

#[derive(Default)]
struct RecordingQueue {
    resubmitted: Mutex<Vec<TaskRef>>,
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn resubmit(&self, task: &TaskRef) -> anyhow::Result<()> {
        self.resubmitted.lock().unwrap().push(task.clone());
        Ok(())
    }
}

struct Harness {
    compute: Arc<SimulatedCompute>,
    transport: Arc<SimulatedTransport>,
    store: WorkerStore,
    lifecycle: WorkerLifecycle,
    queue: Arc<RecordingQueue>,
    strategy: ProvisioningStrategy,
    reconciler: OrphanReconciler,
}

async fn harness_on(compute: Arc<SimulatedCompute>, controllers: Vec<ControllerConfig>) -> Harness {
    let transport = Arc::new(SimulatedTransport::new());
    let store = WorkerStore::new();
    let queue = Arc::new(RecordingQueue::default());
    let executor = BootstrapExecutor::new(
        transport.clone(),
        AgentPayload::new("agent.jar", b"agent".to_vec()),
        BootstrapSettings::default(),
    );
    let lifecycle = WorkerLifecycle::new(
        compute.clone(),
        executor,
        store.clone(),
        LifecycleSettings::default(),
    )
    .with_job_queue(queue.clone());

    let registry = FleetRegistry::new();
    for (seed, config) in controllers.into_iter().enumerate() {
        registry
            .register(Arc::new(
                FleetController::new(config, compute.clone(), lifecycle.clone()).with_seed(seed as u64),
            ))
            .await
            .unwrap();
    }

    Harness {
        compute,
        transport,
        store: store.clone(),
        lifecycle,
        queue,
        strategy: ProvisioningStrategy::new(registry.clone(), store, CapacityPolicy::CountLaunching)
            .with_seed(11),
        reconciler: OrphanReconciler::new(registry, Duration::from_secs(3600)),
    }
}

async fn harness(controllers: Vec<ControllerConfig>) -> Harness {
    harness_on(Arc::new(SimulatedCompute::new()), controllers).await
}

fn request(label: &str, demand: u32) -> ProvisioningRequest {
    ProvisioningRequest {
        label: LabelExpr::parse(label).unwrap(),
        demand,
    }
}

/// Let spawned terminations and watchers run.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn one_shot_workers_on_two_clouds_run_one_job_each() {
    let h = harness(vec![
        controller("east", vec![one_shot_template("T1", "build")]),
        controller("west", vec![one_shot_template("T1", "build")]),
    ])
    .await;

    let outcome = h.strategy.apply(&request("build", 2)).await;
    assert_eq!(outcome.decision, Decision::Complete);
    assert_eq!(outcome.pending.len(), 2);

    let instances = h.compute.instances();
    assert_eq!(instances.len(), 2);
    assert!(instances.iter().all(|i| i.labels[CONFIG_LABEL] == "t1"));
    assert_eq!(instances[0].labels[FLEET_ID_LABEL], instances[1].labels[FLEET_ID_LABEL]);

    let mut workers = Vec::new();
    for p in outcome.pending {
        workers.push(p.wait().await.unwrap().name);
    }

    for (i, worker) in workers.iter().enumerate() {
        let task = TaskRef::new(format!("job-{i}"));
        h.lifecycle.task_accepted(worker, &task).await.unwrap();
        h.lifecycle
            .task_completed(worker, &task, Outcome::Success)
            .await
            .unwrap();
    }
    settle().await;

    assert!(h.store.is_empty().await);
    let mut terminated = h.compute.terminated();
    terminated.sort();
    workers.sort();
    assert_eq!(terminated, workers);
    assert!(h.queue.resubmitted.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_worker_is_abandoned_after_launch_timeout() {
    let t = WorkerTemplate {
        launch_timeout: Duration::from_secs(5),
        ..template("build", "build")
    };
    let h = harness(vec![controller("c1", vec![t])]).await;
    h.transport.set_default(HostBehavior::unreachable());

    let outcome = h.strategy.apply(&request("build", 1)).await;
    let pending = outcome.pending.into_iter().next().unwrap();
    let name = pending.name.clone();

    let started = tokio::time::Instant::now();
    let err = pending.wait().await.unwrap_err();
    assert!(matches!(err, LifecycleError::LaunchTimeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(6));

    assert_eq!(h.compute.terminated(), vec![name.clone()]);
    assert!(h.store.get(&name).await.is_none());
    assert!(!h.lifecycle.is_monitored(&name).await);
}

#[tokio::test(start_paused = true)]
async fn restart_orphans_are_reclaimed_but_stopping_ones_left_alone() {
    let compute = Arc::new(SimulatedCompute::new());
    let before = harness_on(compute.clone(), vec![controller("c1", vec![template("build", "")])]).await;
    let outcome = before.strategy.apply(&request("", 2)).await;
    for p in outcome.pending {
        p.wait().await.unwrap();
    }
    before.lifecycle.shutdown().await;

    let mut stopping: Instance = compute.instances()[0].clone();
    stopping.name = "build-stopng".to_string();
    stopping.status = InstanceStatus::Stopping;
    stopping.labels = fleet_selector("c1");
    compute.seed_instance("ci-project", stopping);

    // A fresh process: same cloud, empty bookkeeping.
    let after = harness_on(compute.clone(), vec![controller("c1", vec![template("build", "")])]).await;
    let stats = after.reconciler.sweep().await;

    assert_eq!(stats.remote, 3);
    assert_eq!(stats.orphans_deleted, 2);
    assert_eq!(stats.skipped_stopping, 1);
    assert!(!compute.terminated().contains(&"build-stopng".to_string()));
}

#[tokio::test(start_paused = true)]
async fn live_workers_survive_every_sweep() {
    let h = harness(vec![controller("c1", vec![template("build", "")])]).await;
    let outcome = h.strategy.apply(&request("", 2)).await;

    // Sweep while the launches are still in flight.
    assert_eq!(h.reconciler.sweep().await.orphans_deleted, 0);
    for p in outcome.pending {
        p.wait().await.unwrap();
    }
    assert_eq!(h.reconciler.sweep().await.orphans_deleted, 0);
    assert!(h.compute.terminated().is_empty());
}

#[tokio::test(start_paused = true)]
async fn busy_worker_outlives_retention_then_is_reclaimed_when_idle() {
    let h = harness(vec![controller("c1", vec![template("build", "")])]).await;
    let outcome = h.strategy.apply(&request("", 1)).await;
    let worker = outcome.pending.into_iter().next().unwrap().wait().await.unwrap().name;

    let task = TaskRef::new("long-build");
    h.lifecycle.task_accepted(&worker, &task).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1000)).await;
    assert_eq!(h.store.get(&worker).await.unwrap().state, WorkerState::Online);

    h.lifecycle
        .task_completed(&worker, &task, Outcome::Success)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(h.store.contains(&worker).await);

    tokio::time::sleep(Duration::from_secs(130)).await;
    assert!(!h.store.contains(&worker).await);
    assert_eq!(h.compute.terminated(), vec![worker]);
}

#[tokio::test(start_paused = true)]
async fn preempted_one_shot_job_is_resubmitted_once() {
    let t = WorkerTemplate {
        preemptible: true,
        ..one_shot_template("spot", "build")
    };
    let h = harness(vec![controller("c1", vec![t])]).await;
    let outcome = h.strategy.apply(&request("build", 1)).await;
    let ready = outcome.pending.into_iter().next().unwrap().wait().await.unwrap();
    assert!(h.lifecycle.is_watching_preemption(&ready.name).await);

    let task = TaskRef::new("flaky-build");
    h.lifecycle.task_accepted(&ready.name, &task).await.unwrap();
    assert!(h.transport.preempt(&ready.address).await);
    settle().await;
    assert!(h.store.get(&ready.name).await.unwrap().preempted);

    h.lifecycle
        .task_completed(&ready.name, &task, Outcome::Failure)
        .await
        .unwrap();
    settle().await;

    assert_eq!(*h.queue.resubmitted.lock().unwrap(), vec![task.retry()]);
    assert!(!h.store.contains(&ready.name).await);
}
