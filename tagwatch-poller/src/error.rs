//! Error types for tagwatch-poller.

use std::path::PathBuf;

use thiserror::Error;

use tagwatch_core::{AccountName, ConfigError, RegistryError};

/// All errors that can arise from a poll cycle.
#[derive(Debug, Error)]
pub enum PollError {
    /// An error from the account registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// An error loading global settings.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The remote source could not list the account's images.
    #[error("listing images for account '{account}' failed: {source}")]
    RemoteListing {
        account: AccountName,
        #[source]
        source: SourceError,
    },

    /// The caller asked for an account the registry does not know.
    #[error("unknown account '{0}'")]
    UnknownAccount(AccountName),

    /// The cache store failed while reading or writing an account's keys.
    #[error("cache error for account '{account}': {source}")]
    Cache {
        account: AccountName,
        #[source]
        source: CacheError,
    },

    /// A notification sink could not be constructed.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Failures of the remote tag-listing source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures of the persistent cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache state lock poisoned")]
    Poisoned,
}

/// Failures delivering an event to a notification sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("posting event to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("event JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`CacheError::Io`].
pub(crate) fn cache_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.into(),
        source,
    }
}
