//! The polling monitor seam: one implementation per kind of data source.

use std::sync::Arc;

use tagwatch_core::{Account, AccountName, AccountSnapshot};

use crate::cache::CacheStore;
use crate::commit::{commit_delta, CommitReport};
use crate::delta::{generate_delta, PollingDelta};
use crate::error::PollError;
use crate::key::KeyCodec;
use crate::sink::NotificationSink;
use crate::sizer;
use crate::source::RemoteSource;

/// Override points the cycle drives for each partition.
pub trait PollingMonitor: Send + Sync {
    /// Resolve `name` to its account in `snapshot`.
    fn partition<'a>(
        &self,
        snapshot: &'a AccountSnapshot,
        name: &AccountName,
    ) -> Result<&'a Account, PollError> {
        snapshot
            .get(name)
            .ok_or_else(|| PollError::UnknownAccount(name.clone()))
    }

    fn generate_delta(&self, account: &Account) -> Result<PollingDelta, PollError>;

    fn commit_delta(&self, delta: PollingDelta, notify: bool) -> Result<CommitReport, PollError>;

    fn upper_threshold(&self, account: &Account) -> u32;
}

/// Reconciles registry image tags against the cache.
#[derive(Clone)]
pub struct ImageTagMonitor {
    source: Arc<dyn RemoteSource>,
    cache: Arc<dyn CacheStore>,
    sink: Option<Arc<dyn NotificationSink>>,
    codec: KeyCodec,
    default_threshold: u32,
}

impl ImageTagMonitor {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        cache: Arc<dyn CacheStore>,
        codec: KeyCodec,
        default_threshold: u32,
    ) -> Self {
        Self {
            source,
            cache,
            sink: None,
            codec,
            default_threshold,
        }
    }

    pub fn with_sink(mut self, sink: Option<Arc<dyn NotificationSink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }
}

impl PollingMonitor for ImageTagMonitor {
    fn generate_delta(&self, account: &Account) -> Result<PollingDelta, PollError> {
        generate_delta(account, self.source.as_ref(), self.cache.as_ref(), &self.codec)
    }

    fn commit_delta(&self, delta: PollingDelta, notify: bool) -> Result<CommitReport, PollError> {
        commit_delta(delta, notify, self.cache.as_ref(), self.sink.as_deref())
    }

    fn upper_threshold(&self, account: &Account) -> u32 {
        sizer::upper_threshold(account, self.default_threshold)
    }
}
