//! The job-queue boundary as seen from a worker.

use std::fmt;

use async_trait::async_trait;

/// One run of a job on a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub id: String,
    /// 1 for the first run, incremented on every resubmission.
    pub attempt: u32,
}

impl TaskRef {
    /// First attempt of run `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attempt: 1,
        }
    }

    /// The same job, one attempt later.
    pub fn retry(&self) -> Self {
        Self {
            id: self.id.clone(),
            attempt: self.attempt + 1,
        }
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.attempt)
    }
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The job itself failed.
    Failure,
    /// The run was cut short by the infrastructure: interrupted, agent
    /// lost, instance preempted.
    Problem,
}

/// The external job queue. Only resubmission is needed from here.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn resubmit(&self, task: &TaskRef) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_bumps_attempt() {
        let t = TaskRef::new("build-42");
        assert_eq!(t.attempt, 1);
        let r = t.retry();
        assert_eq!(r.id, "build-42");
        assert_eq!(r.attempt, 2);
        assert_eq!(r.to_string(), "build-42#2");
    }
}
