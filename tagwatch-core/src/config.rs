//! Global settings loaded from `<home>/.tagwatch/config.yaml`.
//!
//! Every field has a default, so a missing file (or an empty one) yields
//! [`Config::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::root_at;

pub const DEFAULT_CACHE_PREFIX: &str = "tagwatch";
pub const DEFAULT_UPPER_THRESHOLD: u32 = 1000;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace prefix of every cache key.
    pub cache_prefix: String,
    /// Ceiling used for accounts without `item_upper_threshold`.
    pub default_upper_threshold: u32,
    pub poll_interval_secs: u64,
    /// Daemon commits without notifying.
    pub fast_forward: bool,
    /// Daemon skips commits whose delta exceeds the account threshold.
    pub enforce_threshold: bool,
    pub http_timeout_secs: u64,
    pub sink: SinkConfig,
}

/// Where change notifications go. Both unset means the sink is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub webhook_url: Option<String>,
    /// Relative paths resolve against `~/.tagwatch/`.
    pub events_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            default_upper_threshold: DEFAULT_UPPER_THRESHOLD,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            fast_forward: false,
            enforce_threshold: true,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            sink: SinkConfig::default(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Absolute path of the JSON-lines sink, if configured.
    pub fn events_file_at(&self, home: &Path) -> Option<PathBuf> {
        self.sink.events_file.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                root_at(home).join(p)
            }
        })
    }
}

/// `<home>/.tagwatch/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

/// Load the global config, falling back to defaults when the file is absent.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        assert_eq!(load_at(home.path()).unwrap(), Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "cache_prefix: igor\nsink:\n  events_file: events.jsonl\n").unwrap();

        let config = load_at(home.path()).unwrap();
        assert_eq!(config.cache_prefix, "igor");
        assert_eq!(config.default_upper_threshold, DEFAULT_UPPER_THRESHOLD);
        assert_eq!(
            config.events_file_at(home.path()),
            Some(home.path().join(".tagwatch").join("events.jsonl"))
        );
        assert_eq!(config.sink.webhook_url, None);
    }

    #[test]
    fn malformed_file_reports_path() {
        let home = TempDir::new().unwrap();
        let path = config_path_at(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "default_upper_threshold: [not, a, number]\n").unwrap();

        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = Config {
            poll_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
