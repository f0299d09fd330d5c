//! Instance, operation and spec types exchanged with the compute API.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use fleet_core::{AcceleratorConfig, BootDisk, NetworkConfig, WorkerTemplate};
use serde::{Deserialize, Serialize};

/// Label carrying the originating template's description.
pub const CONFIG_LABEL: &str = "fleet-config";

/// Label carrying the owning controller's id.
pub const FLEET_ID_LABEL: &str = "fleet-id";

/// Metadata key listing the template's job labels.
pub const LABELS_METADATA_KEY: &str = "fleet-labels";

/// Metadata key for the user startup script.
pub const STARTUP_SCRIPT_METADATA_KEY: &str = "startup-script";

const MAX_LABEL_VALUE_LEN: usize = 63;

/// Map arbitrary text onto the provider's label-value alphabet
/// (lowercase letters, digits, `-` and `_`, at most 63 characters).
pub fn label_value(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_VALUE_LEN)
        .collect()
}

/// Label selector matching every instance owned by `controller_id`.
pub fn fleet_selector(controller_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(FLEET_ID_LABEL.to_string(), label_value(controller_id))])
}

/// Provider-side instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Provisioning,
    Staging,
    Running,
    Stopping,
    Stopped,
    Suspending,
    Suspended,
    Repairing,
    Terminated,
}

impl InstanceStatus {
    /// Provider spelling of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Staging => "STAGING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Suspending => "SUSPENDING",
            Self::Suspended => "SUSPENDED",
            Self::Repairing => "REPAIRING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PROVISIONING" => Ok(Self::Provisioning),
            "STAGING" => Ok(Self::Staging),
            "RUNNING" => Ok(Self::Running),
            "STOPPING" => Ok(Self::Stopping),
            "STOPPED" => Ok(Self::Stopped),
            "SUSPENDING" => Ok(Self::Suspending),
            "SUSPENDED" => Ok(Self::Suspended),
            "REPAIRING" => Ok(Self::Repairing),
            "TERMINATED" => Ok(Self::Terminated),
            other => Err(format!("unknown instance status '{other}'")),
        }
    }
}

/// A cloud instance as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub zone: String,
    pub status: InstanceStatus,
    pub labels: BTreeMap<String, String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    /// Name of the boot disk, used for snapshots.
    pub boot_disk: String,
}

impl Instance {
    /// Owning controller id, if the instance was created by a fleet.
    pub fn fleet_id(&self) -> Option<&str> {
        self.labels.get(FLEET_ID_LABEL).map(String::as_str)
    }

    /// Originating template description label.
    pub fn config_name(&self) -> Option<&str> {
        self.labels.get(CONFIG_LABEL).map(String::as_str)
    }

    /// Address to bootstrap over.
    pub fn address(&self, use_internal: bool) -> Option<&str> {
        if use_internal {
            self.internal_ip.as_deref()
        } else {
            self.external_ip.as_deref()
        }
    }
}

/// Handle to a long-running provider operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub zone: Option<String>,
    /// Resource the operation acts on.
    pub target: String,
}

/// Everything needed to insert one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub boot: BootDisk,
    pub network: NetworkConfig,
    pub accelerator: Option<AcceleratorConfig>,
    pub preemptible: bool,
    pub service_account: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
}

impl InstanceSpec {
    /// Build the insert request for one instance of `template`, stamped
    /// with both fleet labels.
    pub fn from_template(template: &WorkerTemplate, name: &str, controller_id: &str) -> Self {
        let labels = BTreeMap::from([
            (CONFIG_LABEL.to_string(), label_value(&template.description)),
            (FLEET_ID_LABEL.to_string(), label_value(controller_id)),
        ]);

        let mut metadata = template.metadata.clone();
        if !template.labels.is_empty() {
            metadata.insert(LABELS_METADATA_KEY.to_string(), template.labels.to_string());
        }
        if let Some(script) = &template.startup_script {
            metadata.insert(STARTUP_SCRIPT_METADATA_KEY.to_string(), script.clone());
        }

        Self {
            name: name.to_string(),
            zone: template.zone.clone(),
            machine_type: template.machine_type.clone(),
            boot: template.boot.clone(),
            network: template.network.clone(),
            accelerator: template.accelerator.clone(),
            preemptible: template.preemptible,
            service_account: template.service_account.clone(),
            labels,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::fixtures::template;

    #[test]
    fn spec_carries_fleet_labels() {
        let mut t = template("Linux Build", "build linux");
        t.startup_script = Some("apt-get install -y openjdk-17-jre".to_string());
        let spec = InstanceSpec::from_template(&t, "linux-build-abc123", "c1");

        assert_eq!(spec.labels[CONFIG_LABEL], "linux-build");
        assert_eq!(spec.labels[FLEET_ID_LABEL], "c1");
        assert_eq!(spec.metadata[LABELS_METADATA_KEY], "build linux");
        assert!(spec.metadata.contains_key(STARTUP_SCRIPT_METADATA_KEY));
        assert_eq!(spec.zone, "us-central1-a");
    }

    #[test]
    fn label_values_are_sanitized_and_bounded() {
        assert_eq!(label_value("Team/Build 01"), "team-build-01");
        assert_eq!(label_value(&"x".repeat(100)).len(), 63);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("running".parse::<InstanceStatus>().unwrap(), InstanceStatus::Running);
        assert_eq!("STOPPING".parse::<InstanceStatus>().unwrap(), InstanceStatus::Stopping);
        assert!("EXPLODED".parse::<InstanceStatus>().is_err());
        assert_eq!(InstanceStatus::Running.to_string(), "RUNNING");
    }
}
