//! Ready-made templates and controllers for tests across the workspace.
//!
//! Compiled for this crate's own tests and, through the `fixtures`
//! feature, for the dev-dependencies of the other fleet crates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ControllerConfig;
use crate::labels::LabelSet;
use crate::template::*;

/// A one-executor unix template carrying `labels`.
pub fn template(description: &str, labels: &str) -> WorkerTemplate {
    WorkerTemplate {
        description: description.to_string(),
        name_prefix: description.to_string(),
        region: "us-central1".to_string(),
        zone: "us-central1-a".to_string(),
        machine_type: "n2-standard-2".to_string(),
        labels: LabelSet::parse(labels).unwrap(),
        mode: LabelMode::Normal,
        executors: 1,
        one_shot: false,
        retention: Duration::from_secs(360),
        create_snapshot: false,
        launch_timeout: Duration::from_secs(300),
        preemptible: false,
        wait_for_startup_script: false,
        resubmit_on_problem: false,
        boot: BootDisk {
            source: BootSource::Image(
                "projects/debian-cloud/global/images/family/debian-12".to_string(),
            ),
            size_gb: 20,
            disk_type: None,
        },
        network: NetworkConfig::default(),
        accelerator: None,
        service_account: None,
        startup_script: None,
        metadata: BTreeMap::new(),
        launch: LaunchConfig {
            method: LaunchMethod::Unix,
            user: "ci".to_string(),
            port: 22,
            remote_fs: "/home/ci/agent".to_string(),
            java_path: "java".to_string(),
            jvm_options: Vec::new(),
            credential: Credential::Password("secret".to_string()),
        },
    }
}

/// A one-shot template, the strict job-isolation flavour.
pub fn one_shot_template(description: &str, labels: &str) -> WorkerTemplate {
    WorkerTemplate {
        one_shot: true,
        resubmit_on_problem: true,
        ..template(description, labels)
    }
}

/// A fast-provisioning controller in project `ci-project`.
pub fn controller(id: &str, templates: Vec<WorkerTemplate>) -> ControllerConfig {
    ControllerConfig {
        id: id.to_string(),
        name: format!("cloud-{id}"),
        project: "ci-project".to_string(),
        instance_cap: None,
        fast_provisioning: true,
        templates: templates.into_iter().map(Arc::new).collect(),
    }
}
