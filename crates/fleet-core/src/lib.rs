//! fleet-core — shared configuration types for the worker fleet.
//!
//! Everything a provisioning decision reads is defined here and is
//! immutable once loaded:
//!
//! - [`WorkerTemplate`]: machine shape, boot source, labels, executor count
//!   and retention policy for one kind of worker.
//! - [`ControllerConfig`]: one cloud account/project with its templates.
//! - [`LabelSet`] / [`LabelExpr`]: the label model used to match queued
//!   jobs to templates.
//! - [`FleetConfig`]: the parsed and validated `fleet.toml`.
//!
//! # fleet.toml
//!
//! ```text
//! [daemon]
//! reconcile_interval = "1h"
//!
//! [[controller]]
//! id = "5b0c…"            # stable, survives display-name renames
//! name = "gce-main"
//! project = "ci-project"
//!
//! [[controller.template]]
//! description = "linux-build"
//! name_prefix = "build"
//! zone = "us-central1-a"
//! machine_type = "n2-standard-4"
//! labels = "build linux"
//! ```

pub mod config;
pub mod duration;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
pub mod labels;
pub mod template;

pub use config::{Backend, CapacityPolicy, ControllerConfig, DaemonSettings, FleetConfig};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use labels::{LabelExpr, LabelSet};
pub use template::*;
