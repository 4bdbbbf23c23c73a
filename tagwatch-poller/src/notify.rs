//! Notification step: turn one committed observation into an [`ImageEvent`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tagwatch_core::{AccountName, ObservedImage};

use crate::key::ImageKey;
use crate::sink::NotificationSink;

pub const ARTIFACT_TYPE: &str = "docker/image";

/// Payload delivered to a [`NotificationSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEvent {
    pub key: ImageKey,
    pub content: EventContent,
    pub artifact: Artifact,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContent {
    pub account: AccountName,
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
}

/// Deployable reference synthesized from the observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    /// `<registry>/<repository>`
    pub name: String,
    pub version: String,
    /// `<registry>/<repository>:<tag>`
    pub reference: String,
}

impl ImageEvent {
    pub fn new(key: ImageKey, image: &ObservedImage) -> Self {
        let name = format!("{}/{}", image.registry, image.repository);
        Self {
            key,
            content: EventContent {
                account: image.account.clone(),
                registry: image.registry.clone(),
                repository: image.repository.clone(),
                tag: image.tag.clone(),
                digest: image.digest.clone(),
            },
            artifact: Artifact {
                kind: ARTIFACT_TYPE.to_string(),
                reference: format!("{name}:{}", image.tag),
                name,
                version: image.tag.clone(),
            },
            observed_at: Utc::now(),
        }
    }
}

/// What happened to one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// No sink configured; recorded, never an error.
    SinkDisabled,
    /// The account had no cached images before this cycle.
    SuppressedEmptyCache,
    /// The sink rejected the event; the commit stands.
    Failed,
}

/// Deliver one event for `image`, unless the sink is absent or the account's
/// pre-cycle snapshot is empty.
///
/// An empty snapshot means a first poll or a lost cache; notifying then would
/// report every existing tag as new.
pub fn notify(
    sink: Option<&dyn NotificationSink>,
    cached_keys: &BTreeSet<ImageKey>,
    image: &ObservedImage,
    key: &ImageKey,
) -> NotifyOutcome {
    let Some(sink) = sink else {
        tracing::debug!("sink disabled, missed notification for {key}");
        return NotifyOutcome::SinkDisabled;
    };
    if cached_keys.is_empty() {
        tracing::debug!(
            "account '{}' had no cached images, suppressing notification for {key}",
            image.account
        );
        return NotifyOutcome::SuppressedEmptyCache;
    }

    let event = ImageEvent::new(key.clone(), image);
    match sink.post_event(&event) {
        Ok(()) => {
            tracing::info!("notified: {}", event.artifact.reference);
            NotifyOutcome::Sent
        }
        Err(err) => {
            tracing::warn!("notification for {} failed: {err}", event.artifact.reference);
            NotifyOutcome::Failed
        }
    }
}
