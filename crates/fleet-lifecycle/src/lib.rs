//! fleet-lifecycle — the per-worker state machine.
//!
//! [`WorkerLifecycle`] takes a worker from an accepted insert operation to
//! removal:
//!
//! ```text
//! WorkerLifecycle
//!   ├── Launcher
//!   │     ├── wait_for_operation(insert)
//!   │     ├── poll get_instance until RUNNING
//!   │     ├── BootstrapExecutor::bootstrap()
//!   │     └── all under launch_timeout; failure → Terminator(LaunchFailed)
//!   ├── RetentionMonitor (one timer task per online worker)
//!   │     └── RetentionPolicy::check → IdleTimeout | OneShot
//!   ├── PreemptionWatcher (preemptible workers only)
//!   │     └── metadata long-poll → mark preempted
//!   ├── task_accepted / task_completed (from the job queue)
//!   │     └── RetentionPolicy::on_task_completed → resubmit? terminate?
//!   └── Terminator
//!         ├── snapshot boot disk (create_snapshot && last task failed)
//!         ├── terminate_instance_async (not awaited)
//!         └── remove record
//! ```
//!
//! Termination is idempotent: once a record is past `Online`, further
//! requests are ignored. Delete failures are logged and left for the
//! reconciliation sweep.

pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod monitor;
pub mod preemption;
pub mod retention;
pub mod task;
pub mod terminator;

pub use error::{LifecycleError, LifecycleResult};
pub use launcher::{LaunchRequest, Launcher, WorkerReady};
pub use lifecycle::{LifecycleSettings, WorkerLifecycle};
pub use monitor::{RetentionCheck, RetentionMonitor};
pub use preemption::{PreemptionCallback, PreemptionWatcher};
pub use retention::{CompletionAction, IdleTimeout, OneShot, RetentionPolicy, policy_for};
pub use task::{JobQueue, Outcome, TaskRef};
pub use terminator::Terminator;
