//! The set of controllers this process runs.

use std::sync::Arc;

use fleet_core::LabelExpr;
use tokio::sync::RwLock;
use tracing::info;

use crate::cloud::FleetController;
use crate::error::{ProvisionError, ProvisionResult};

/// Registered controllers in registration order. Cheap to clone.
#[derive(Clone, Default)]
pub struct FleetRegistry {
    controllers: Arc<RwLock<Vec<Arc<FleetController>>>>,
}

impl FleetRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `controller`. Ids must be unique.
    pub async fn register(&self, controller: Arc<FleetController>) -> ProvisionResult<()> {
        let mut controllers = self.controllers.write().await;
        if controllers.iter().any(|c| c.id() == controller.id()) {
            return Err(ProvisionError::DuplicateController(controller.id().to_string()));
        }
        info!(controller = %controller.id(), name = %controller.name(), "controller registered");
        controllers.push(controller);
        Ok(())
    }

    /// Remove and return the controller with `id`.
    pub async fn unregister(&self, id: &str) -> Option<Arc<FleetController>> {
        let mut controllers = self.controllers.write().await;
        let pos = controllers.iter().position(|c| c.id() == id)?;
        info!(controller = %id, "controller unregistered");
        Some(controllers.remove(pos))
    }

    /// Look up a controller by id.
    pub async fn get(&self, id: &str) -> Option<Arc<FleetController>> {
        self.controllers
            .read()
            .await
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Every registered controller, in registration order.
    pub async fn controllers(&self) -> Vec<Arc<FleetController>> {
        self.controllers.read().await.clone()
    }

    /// Controllers with at least one template for `label`.
    pub async fn capable(&self, label: &LabelExpr) -> Vec<Arc<FleetController>> {
        self.controllers
            .read()
            .await
            .iter()
            .filter(|c| c.can_provision(label))
            .cloned()
            .collect()
    }

    /// Number of registered controllers.
    pub async fn len(&self) -> usize {
        self.controllers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.controllers.read().await.is_empty()
    }
}
