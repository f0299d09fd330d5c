//! WorkerStore — concurrent map of worker records.
//!
//! Readers (reconciliation, capacity accounting) take cloned snapshots so
//! they never observe a half-applied update; writers go through
//! [`WorkerStore::update`] or [`WorkerStore::transition`], which hold the
//! write lock for the whole mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fleet_core::{CapacityPolicy, LabelExpr};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::types::{WorkerRecord, WorkerState};

/// Shared worker bookkeeping. Cheap to clone.
#[derive(Clone, Default)]
pub struct WorkerStore {
    records: Arc<RwLock<HashMap<String, WorkerRecord>>>,
}

impl WorkerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Records ────────────────────────────────────────────────────

    /// Publish a new record. Names are unique.
    pub async fn insert(&self, record: WorkerRecord) -> StateResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.name) {
            return Err(StateError::AlreadyExists(record.name));
        }
        debug!(worker = %record.name, controller = %record.controller_id, state = %record.state, "worker record published");
        records.insert(record.name.clone(), record);
        Ok(())
    }

    /// Snapshot of the record for `name`.
    pub async fn get(&self, name: &str) -> Option<WorkerRecord> {
        self.records.read().await.get(name).cloned()
    }

    /// Whether a record exists for `name`, in any state.
    pub async fn contains(&self, name: &str) -> bool {
        self.records.read().await.contains_key(name)
    }

    /// Drop the record for `name` from bookkeeping.
    pub async fn remove(&self, name: &str) -> Option<WorkerRecord> {
        let removed = self.records.write().await.remove(name);
        if removed.is_some() {
            debug!(worker = %name, "worker record removed");
        }
        removed
    }

    /// Apply `f` to the record under the write lock.
    pub async fn update<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut WorkerRecord) -> T,
    ) -> StateResult<T> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(name)
            .ok_or_else(|| StateError::NotFound(name.to_string()))?;
        Ok(f(record))
    }

    /// Move a record forward to `next`, returning the state it left.
    pub async fn transition(&self, name: &str, next: WorkerState) -> StateResult<WorkerState> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(name)
            .ok_or_else(|| StateError::NotFound(name.to_string()))?;
        let from = record.state;
        if !from.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                name: name.to_string(),
                from,
                to: next,
            });
        }
        record.state = next;
        debug!(worker = %name, %from, to = %next, "worker state changed");
        Ok(from)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Snapshot of every record.
    pub async fn list(&self) -> Vec<WorkerRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Snapshot of the records owned by `controller_id`.
    pub async fn list_by_controller(&self, controller_id: &str) -> Vec<WorkerRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.controller_id == controller_id)
            .cloned()
            .collect()
    }

    /// Instance names the controller currently has records for.
    pub async fn names_for_controller(&self, controller_id: &str) -> HashSet<String> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.controller_id == controller_id)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Records of the controller that have not reached `Terminated`.
    pub async fn live_count(&self, controller_id: &str) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.controller_id == controller_id && r.state != WorkerState::Terminated)
            .count()
    }

    /// Executor slots that can take a job for `label` right now.
    ///
    /// Online workers contribute their idle executors. Under
    /// [`CapacityPolicy::CountLaunching`], workers still being inserted or
    /// bootstrapped contribute all their executors.
    pub async fn available_executors(&self, label: &LabelExpr, policy: CapacityPolicy) -> u32 {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.accepts(label))
            .map(|r| match r.state {
                WorkerState::Online => r.idle_executors(),
                s if s.is_pending() && policy == CapacityPolicy::CountLaunching => r.executors,
                _ => 0,
            })
            .fold(0, u32::saturating_add)
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
