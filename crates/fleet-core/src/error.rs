//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating fleet configuration.
///
/// These are configuration-time errors: they are reported synchronously
/// to whoever asked for the configuration and never reach the
/// provisioning loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{context}: {reason}")]
    Invalid { context: String, reason: String },

    #[error("controller '{controller}' has no id; add `id = \"{suggestion}\"` and keep it stable")]
    MissingControllerId {
        controller: String,
        suggestion: String,
    },

    #[error("duplicate controller id: {0}")]
    DuplicateControllerId(String),

    #[error("invalid label expression '{expr}': {reason}")]
    Label { expr: String, reason: String },

    #[error("credential error in {context}: {reason}")]
    Credential { context: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            context: context.into(),
            reason: reason.into(),
        }
    }
}
