//! Worker record and lifecycle state types.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fleet_core::{LabelExpr, LabelMode, LabelSet, WorkerTemplate, accepts_labels};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Why a worker is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    LaunchFailed,
    IdleTimeout,
    OneShotComplete,
    Preempted,
    Administrative,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LaunchFailed => "launch-failed",
            Self::IdleTimeout => "idle-timeout",
            Self::OneShotComplete => "one-shot-complete",
            Self::Preempted => "preempted",
            Self::Administrative => "administrative",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Requested,
    Inserting,
    Launching,
    Online,
    Terminating(TerminationReason),
    Snapshotting,
    Terminated,
}

impl WorkerState {
    fn rank(&self) -> u8 {
        match self {
            Self::Requested => 0,
            Self::Inserting => 1,
            Self::Launching => 2,
            Self::Online => 3,
            Self::Terminating(_) => 4,
            Self::Snapshotting => 5,
            Self::Terminated => 6,
        }
    }

    /// Transitions are strictly forward; skipping states is allowed.
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        next.rank() > self.rank()
    }

    /// Capacity that has been asked for but is not online yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Requested | Self::Inserting | Self::Launching)
    }

    /// Past `Online`: termination has begun or finished.
    pub fn is_terminating(&self) -> bool {
        self.rank() > Self::Online.rank()
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::Inserting => f.write_str("inserting"),
            Self::Launching => f.write_str("launching"),
            Self::Online => f.write_str("online"),
            Self::Terminating(reason) => write!(f, "terminating({reason})"),
            Self::Snapshotting => f.write_str("snapshotting"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// Bookkeeping for one cloud instance bound to the fleet.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    /// Cloud instance name; unique across the fleet.
    pub name: String,
    pub controller_id: String,
    pub project: String,
    pub zone: String,
    /// Originating template description.
    pub template: String,
    pub labels: LabelSet,
    pub mode: LabelMode,
    pub state: WorkerState,
    pub executors: u32,
    pub preemptible: bool,
    pub one_shot: bool,
    pub resubmit_on_problem: bool,
    pub create_snapshot: bool,
    pub retention: Duration,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    /// Address the agent was bootstrapped over.
    pub address: Option<String>,
    /// Ids of tasks currently running on this worker.
    pub running: BTreeSet<String>,
    pub completed_tasks: u32,
    pub idle_since: Instant,
    pub last_task_failed: bool,
    /// The provider announced preemption.
    pub preempted: bool,
}

impl WorkerRecord {
    /// A fresh record in state `Requested` for an instance of `template`.
    pub fn new(template: &WorkerTemplate, name: &str, controller_id: &str, project: &str) -> Self {
        Self {
            name: name.to_string(),
            controller_id: controller_id.to_string(),
            project: project.to_string(),
            zone: template.zone.clone(),
            template: template.description.clone(),
            labels: template.labels.clone(),
            mode: template.mode,
            state: WorkerState::Requested,
            executors: template.executors,
            preemptible: template.preemptible,
            one_shot: template.one_shot,
            resubmit_on_problem: template.resubmit_on_problem,
            create_snapshot: template.create_snapshot,
            retention: template.retention,
            created_at: epoch_secs(),
            address: None,
            running: BTreeSet::new(),
            completed_tasks: 0,
            idle_since: Instant::now(),
            last_task_failed: false,
            preempted: false,
        }
    }

    /// Whether this worker may run jobs asking for `expr`.
    pub fn accepts(&self, expr: &LabelExpr) -> bool {
        accepts_labels(&self.labels, self.mode, expr)
    }

    /// Executors not running a task right now.
    pub fn idle_executors(&self) -> u32 {
        let busy = u32::try_from(self.running.len()).unwrap_or(u32::MAX);
        self.executors.saturating_sub(busy)
    }

    /// No task is running.
    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }

    /// How long the worker has had nothing running, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        if self.is_idle() {
            now.saturating_duration_since(self.idle_since)
        } else {
            Duration::ZERO
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
