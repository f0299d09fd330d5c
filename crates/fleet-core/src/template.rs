//! Worker templates — the immutable description of one kind of worker.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::labels::{LabelExpr, LabelSet};

/// Alphabet for the random instance-name suffix.
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the random instance-name suffix.
pub const NAME_SUFFIX_LEN: usize = 6;

/// Longest instance name the compute API accepts.
pub const MAX_INSTANCE_NAME_LEN: usize = 63;

/// How a template takes part in label matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    /// Also accepts jobs that request no label.
    #[default]
    Normal,
    /// Only accepts jobs whose label expression it satisfies.
    Exclusive,
}

/// Where the boot disk comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootSource {
    /// A boot image (`projects/debian-cloud/global/images/family/debian-12`).
    Image(String),
    /// A provider-side instance template that supplies the whole shape.
    InstanceTemplate(String),
}

/// Boot disk settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootDisk {
    pub source: BootSource,
    pub size_gb: u32,
    pub disk_type: Option<String>,
}

/// Network and addressing for new instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub network: String,
    pub subnetwork: Option<String>,
    /// Attach an ephemeral external IP.
    pub external_ip: bool,
    /// Bootstrap over the internal address instead of the external one.
    pub use_internal_address: bool,
    pub tags: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network: "default".to_string(),
            subnetwork: None,
            external_ip: true,
            use_internal_address: false,
            tags: Vec::new(),
        }
    }
}

/// GPU/accelerator attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorConfig {
    pub kind: String,
    pub count: u32,
}

/// Operating system family of the worker, which decides how it is
/// bootstrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMethod {
    #[default]
    Unix,
    Windows,
}

/// Credential used to authenticate the bootstrap session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    PrivateKey { pem: String },
    Password(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateKey { .. } => f.write_str("PrivateKey(<redacted>)"),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Remote bootstrap settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub method: LaunchMethod,
    pub user: String,
    pub port: u16,
    /// Agent working directory on the worker.
    pub remote_fs: String,
    pub java_path: String,
    pub jvm_options: Vec<String>,
    pub credential: Credential,
}

impl LaunchConfig {
    fn separator(&self) -> char {
        match self.method {
            LaunchMethod::Unix => '/',
            LaunchMethod::Windows => '\\',
        }
    }

    /// Path of a file inside the agent working directory.
    pub fn remote_path(&self, file: &str) -> String {
        let sep = self.separator();
        format!("{}{sep}{file}", self.remote_fs.trim_end_matches(sep))
    }

    /// Command that creates the agent working directory.
    pub fn mkdir_command(&self) -> String {
        match self.method {
            LaunchMethod::Unix => format!("mkdir -p {}", self.remote_fs),
            LaunchMethod::Windows => format!(
                "if not exist \"{0}\" mkdir \"{0}\"",
                self.remote_fs
            ),
        }
    }

    /// Command that succeeds once the user startup script has finished.
    pub fn startup_finished_command(&self) -> String {
        let sentinel = self.remote_path(".startup-script-finished");
        match self.method {
            LaunchMethod::Unix => format!("test -f {sentinel}"),
            LaunchMethod::Windows => format!("if exist \"{sentinel}\" (exit 0) else (exit 1)"),
        }
    }

    /// Command that starts the agent with its streams on stdin/stdout.
    pub fn agent_command(&self, agent_file: &str) -> String {
        let mut parts = vec![self.java_path.clone()];
        parts.extend(self.jvm_options.iter().cloned());
        parts.push("-jar".to_string());
        parts.push(self.remote_path(agent_file));
        let java = parts.join(" ");
        match self.method {
            LaunchMethod::Unix => format!("cd {} && {java}", self.remote_fs),
            LaunchMethod::Windows => format!("cd /d \"{}\" && {java}", self.remote_fs),
        }
    }
}

/// Label admission shared by templates and the workers launched from them.
pub fn accepts_labels(labels: &LabelSet, mode: LabelMode, expr: &LabelExpr) -> bool {
    match expr {
        LabelExpr::Any => mode == LabelMode::Normal,
        _ => (labels.is_empty() && mode == LabelMode::Normal) || expr.matches(labels),
    }
}

/// A named, reusable worker specification.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerTemplate {
    /// Unique per controller; stamped on instances as the config-name label.
    pub description: String,
    pub name_prefix: String,
    pub region: String,
    pub zone: String,
    pub machine_type: String,
    pub labels: LabelSet,
    pub mode: LabelMode,
    pub executors: u32,
    /// Terminate after exactly one job.
    pub one_shot: bool,
    /// Idle time after which a worker is reclaimed.
    pub retention: Duration,
    pub create_snapshot: bool,
    pub launch_timeout: Duration,
    pub preemptible: bool,
    pub wait_for_startup_script: bool,
    /// One-shot only: give a run that hit a problem one more attempt.
    pub resubmit_on_problem: bool,
    pub boot: BootDisk,
    pub network: NetworkConfig,
    pub accelerator: Option<AcceleratorConfig>,
    pub service_account: Option<String>,
    pub startup_script: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub launch: LaunchConfig,
}

impl WorkerTemplate {
    /// Whether this template can serve a job asking for `expr`.
    ///
    /// An unlabeled request is served by `normal`-mode templates. A labeled
    /// request is served by `normal`-mode templates without labels, and by
    /// any template whose labels satisfy the expression.
    pub fn accepts(&self, expr: &LabelExpr) -> bool {
        accepts_labels(&self.labels, self.mode, expr)
    }

    /// Generate a fresh instance name: `<prefix>-<6 random chars>`.
    pub fn generate_instance_name<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let suffix: String = (0..NAME_SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        let max_prefix = MAX_INSTANCE_NAME_LEN - NAME_SUFFIX_LEN - 1;
        let prefix = if self.name_prefix.len() > max_prefix {
            &self.name_prefix[..max_prefix]
        } else {
            self.name_prefix.as_str()
        };
        format!("{prefix}-{suffix}")
    }

    /// Number of instances needed to cover `executors` executor slots.
    pub fn instances_for(&self, executors: u32) -> u32 {
        executors.div_ceil(self.executors.max(1))
    }
}

#[cfg(test)]
mod tests {
    use crate::fixtures::template;
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn normal_mode_accepts_unlabeled_jobs() {
        let t = template("linux", "build");
        assert!(t.accepts(&LabelExpr::Any));

        let mut exclusive = t.clone();
        exclusive.mode = LabelMode::Exclusive;
        assert!(!exclusive.accepts(&LabelExpr::Any));
        assert!(exclusive.accepts(&LabelExpr::atom("build")));
    }

    #[test]
    fn unlabeled_template_accepts_any_label() {
        let t = template("generic", "");
        assert!(t.accepts(&LabelExpr::atom("whatever")));
    }

    #[test]
    fn labeled_template_requires_match() {
        let t = template("linux", "build linux");
        assert!(t.accepts(&LabelExpr::parse("build && linux").unwrap()));
        assert!(!t.accepts(&LabelExpr::atom("windows")));
    }

    #[test]
    fn instance_names_are_prefixed_and_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = template("build", "");
        let name = t.generate_instance_name(&mut rng);
        assert!(name.starts_with("build-"));
        assert_eq!(name.len(), "build-".len() + NAME_SUFFIX_LEN);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));

        let mut long = t.clone();
        long.name_prefix = "a".repeat(80);
        assert_eq!(long.generate_instance_name(&mut rng).len(), MAX_INSTANCE_NAME_LEN);
    }

    #[test]
    fn instances_for_rounds_up() {
        let mut t = template("build", "");
        t.executors = 4;
        assert_eq!(t.instances_for(1), 1);
        assert_eq!(t.instances_for(4), 1);
        assert_eq!(t.instances_for(5), 2);
        assert_eq!(t.instances_for(0), 0);
    }

    #[test]
    fn launch_commands_follow_os() {
        let mut launch = template("build", "").launch;
        assert_eq!(launch.remote_path("agent.jar"), "/home/ci/agent/agent.jar");
        assert_eq!(
            launch.agent_command("agent.jar"),
            "cd /home/ci/agent && java -jar /home/ci/agent/agent.jar"
        );

        launch.method = LaunchMethod::Windows;
        launch.remote_fs = "C:\\ci".to_string();
        assert_eq!(launch.remote_path("agent.jar"), "C:\\ci\\agent.jar");
        assert!(launch.mkdir_command().starts_with("if not exist"));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let c = Credential::Password("hunter2".to_string());
        assert!(!format!("{c:?}").contains("hunter2"));
    }
}
