//! Retention policies — when an online worker should be reclaimed.

use fleet_state::{TerminationReason, WorkerRecord};
use tokio::time::Instant;

use crate::task::{Outcome, TaskRef};

/// What to do after a task finished on a worker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionAction {
    /// Give this run another attempt on fresh capacity.
    pub resubmit: Option<TaskRef>,
    pub terminate: Option<TerminationReason>,
}

/// Decides when a worker is done.
pub trait RetentionPolicy: Send + Sync {
    /// Periodic check of an online worker.
    fn check(&self, record: &WorkerRecord, now: Instant) -> Option<TerminationReason>;

    /// Called after `task` left the worker; `record` already reflects it.
    fn on_task_completed(
        &self,
        record: &WorkerRecord,
        task: &TaskRef,
        outcome: Outcome,
    ) -> CompletionAction;
}

/// Pick the policy a worker was launched with.
pub fn policy_for(record: &WorkerRecord) -> Box<dyn RetentionPolicy> {
    if record.one_shot {
        Box::new(OneShot {
            resubmit_on_problem: record.resubmit_on_problem,
        })
    } else {
        Box::new(IdleTimeout)
    }
}

/// Shared by both policies: preemption of an idle worker, and idleness
/// past the retention time.
fn idle_verdict(record: &WorkerRecord, now: Instant) -> Option<TerminationReason> {
    if !record.is_idle() {
        return None;
    }
    if record.preempted {
        return Some(TerminationReason::Preempted);
    }
    (record.idle_for(now) >= record.retention).then_some(TerminationReason::IdleTimeout)
}

/// Terminate once the worker has had nothing to run for its retention time.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleTimeout;

impl RetentionPolicy for IdleTimeout {
    fn check(&self, record: &WorkerRecord, now: Instant) -> Option<TerminationReason> {
        idle_verdict(record, now)
    }

    fn on_task_completed(
        &self,
        record: &WorkerRecord,
        _task: &TaskRef,
        _outcome: Outcome,
    ) -> CompletionAction {
        CompletionAction {
            resubmit: None,
            terminate: (record.preempted && record.is_idle()).then_some(TerminationReason::Preempted),
        }
    }
}

/// Terminate after exactly one task.
#[derive(Debug, Clone, Copy)]
pub struct OneShot {
    pub resubmit_on_problem: bool,
}

impl RetentionPolicy for OneShot {
    fn check(&self, record: &WorkerRecord, now: Instant) -> Option<TerminationReason> {
        if record.completed_tasks > 0 && record.is_idle() {
            return Some(TerminationReason::OneShotComplete);
        }
        // A one-shot worker that never got its job is reclaimed like any
        // other idle worker.
        idle_verdict(record, now)
    }

    fn on_task_completed(
        &self,
        record: &WorkerRecord,
        task: &TaskRef,
        outcome: Outcome,
    ) -> CompletionAction {
        let resubmit = (self.resubmit_on_problem && outcome == Outcome::Problem && task.attempt <= 1)
            .then(|| task.retry());
        let reason = if record.preempted {
            TerminationReason::Preempted
        } else {
            TerminationReason::OneShotComplete
        };
        CompletionAction {
            resubmit,
            terminate: Some(reason),
        }
    }
}
