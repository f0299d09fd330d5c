//! fleet-state — in-memory bookkeeping for launched workers.
//!
//! One [`WorkerRecord`] per cloud instance the fleet has asked for. The
//! [`WorkerStore`] is the only shared mutable structure in the engine:
//! provisioning inserts into it, the launcher and retention logic move
//! records forward, and reconciliation and capacity accounting iterate it.
//!
//! # Lifecycle
//!
//! ```text
//! Requested → Inserting → Launching → Online
//!                │             │          │
//!                └─────────────┴──────────┴─→ Terminating(reason)
//!                                               → Snapshotting?
//!                                               → Terminated
//! ```
//!
//! Transitions only ever move forward; [`WorkerStore::transition`] rejects
//! anything else. Records are not persisted: after a restart the two
//! instance labels are the only durable identity, and reconciliation
//! cleans up what the new process no longer knows about.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::WorkerStore;
pub use types::*;
