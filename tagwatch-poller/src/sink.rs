//! Notification sinks.
//!
//! A sink is optional: callers hold `Option<Arc<dyn NotificationSink>>` and
//! treat `None` as "disabled".

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tagwatch_core::Config;

use crate::error::SinkError;
use crate::notify::ImageEvent;

/// Downstream consumer of change events.
pub trait NotificationSink: Send + Sync {
    fn post_event(&self, event: &ImageEvent) -> Result<(), SinkError>;
}

/// POSTs each event as JSON to a webhook URL.
#[derive(Debug)]
pub struct WebhookSink {
    agent: ureq::Agent,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
        }
    }
}

impl NotificationSink for WebhookSink {
    fn post_event(&self, event: &ImageEvent) -> Result<(), SinkError> {
        self.agent
            .post(&self.url)
            .send_json(event)
            .map_err(|err| SinkError::Http {
                url: self.url.clone(),
                message: err.to_string(),
            })?;
        Ok(())
    }
}

/// Appends each event as one JSON line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NotificationSink for JsonLinesSink {
    fn post_event(&self, event: &ImageEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SinkError::Io {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| SinkError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Fans one event out to several sinks; the first failure is returned after
/// every sink has been tried.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn post_event(&self, event: &ImageEvent) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.post_event(event) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Build the sink described by `config`; `None` when no sink is configured.
pub fn from_config(config: &Config, home: &Path) -> Option<Arc<dyn NotificationSink>> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
    if let Some(url) = &config.sink.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone(), config.http_timeout())));
    }
    if let Some(path) = config.events_file_at(home) {
        sinks.push(Arc::new(JsonLinesSink::new(path)));
    }
    match sinks.len() {
        0 => None,
        1 => sinks.pop(),
        _ => Some(Arc::new(FanoutSink::new(sinks))),
    }
}
