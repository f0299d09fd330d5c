//! fleet-reconcile — the correctness backstop for lost bookkeeping.
//!
//! ```text
//! run_periodic(OrphanReconciler, every reconcile_interval)
//!   └── sweep(): for each registered controller
//!         ├── 1. list remote instances labeled fleet-id=<controller id>
//!         ├── 2. snapshot local record names (taken after the listing)
//!         └── 3. for each remote instance without a record:
//!               ├── STOPPING → skip
//!               ├── re-check the live store → skip if published meanwhile
//!               └── terminate_instance_async (not awaited)
//! ```
//!
//! Records are published before their insert call, so an instance visible
//! in the remote listing always has its record in the snapshot that
//! follows. A record in any state is authoritative; the sweep never
//! enforces lifecycle, it only reclaims orphans.

pub mod periodic;
pub mod reconciler;

pub use periodic::{PeriodicTask, run_periodic};
pub use reconciler::{OrphanReconciler, SweepStats};
