//! Error types for tagwatch-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from account registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse account at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.tagwatch/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The account YAML file did not exist at the expected path.
    #[error("account not found at {path}")]
    AccountNotFound { path: PathBuf },

    /// Account names become file names and cache key segments.
    #[error("invalid account name '{name}': {reason}")]
    InvalidAccountName { name: String, reason: &'static str },

    /// Repository names become cache key segments.
    #[error("invalid repository '{repository}' for account '{account}': {reason}")]
    InvalidRepository {
        account: String,
        repository: String,
        reason: &'static str,
    },
}

/// Errors loading `~/.tagwatch/config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
