//! The compute API client boundary.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ComputeResult;
use crate::types::{Instance, InstanceSpec, Operation};

/// Stateless transport to the cloud compute API.
///
/// Implementations own no business state. Every call is scoped to a
/// project; zonal resources also take the zone.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Request creation of an instance. Returns as soon as the provider has
    /// accepted the request.
    async fn insert_instance(&self, project: &str, spec: &InstanceSpec) -> ComputeResult<Operation>;

    /// Fetch one instance; `None` on 404.
    async fn get_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> ComputeResult<Option<Instance>>;

    /// List every instance in the project carrying all of `labels`.
    async fn list_instances_by_label(
        &self,
        project: &str,
        labels: &BTreeMap<String, String>,
    ) -> ComputeResult<Vec<Instance>>;

    /// Request deletion. Callers do not wait for the returned operation.
    async fn terminate_instance_async(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> ComputeResult<Operation>;

    /// Block until `operation` finishes, fails, or `timeout` elapses.
    async fn wait_for_operation(
        &self,
        project: &str,
        operation: &Operation,
        timeout: Duration,
    ) -> ComputeResult<()>;

    async fn create_snapshot(
        &self,
        project: &str,
        zone: &str,
        disk: &str,
        snapshot: &str,
    ) -> ComputeResult<Operation>;

    async fn delete_snapshot(&self, project: &str, snapshot: &str) -> ComputeResult<Operation>;

    // ── Catalog ────────────────────────────────────────────────────

    async fn list_regions(&self, project: &str) -> ComputeResult<Vec<String>>;

    async fn list_zones(&self, project: &str, region: &str) -> ComputeResult<Vec<String>>;

    async fn list_machine_types(&self, project: &str, zone: &str) -> ComputeResult<Vec<String>>;

    async fn list_networks(&self, project: &str) -> ComputeResult<Vec<String>>;

    async fn list_instance_templates(&self, project: &str) -> ComputeResult<Vec<String>>;
}
