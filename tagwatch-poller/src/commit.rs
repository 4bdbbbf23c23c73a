//! Commit pipeline.
//!
//! 1. Stage the digest of every item under the delta's account (last
//!    writer wins).
//! 2. Flush the account once, also when a write failed part way.
//! 3. For each persisted item: `notify == true` → run the notification step
//!    against the pre-cycle key snapshot; `notify == false` → count the event
//!    as skipped; it is not retried.
//!
//! Entries are only ever added or overwritten. Keys missing from this
//! cycle's listing stay cached: a short read from the source must not look
//! like a deletion, or the tag would be reported as new when it reappears.

use serde::Serialize;

use crate::cache::CacheStore;
use crate::delta::PollingDelta;
use crate::error::{CacheError, PollError};
use crate::notify::{notify, NotifyOutcome};
use crate::sink::NotificationSink;

/// Notification counters for one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotifyCounters {
    pub sent: usize,
    /// Commit ran with notifications off (fast-forward).
    pub skipped: usize,
    pub missed_sink_disabled: usize,
    pub suppressed_empty_cache: usize,
    pub failed: usize,
}

impl NotifyCounters {
    pub fn record(&mut self, outcome: NotifyOutcome) {
        match outcome {
            NotifyOutcome::Sent => self.sent += 1,
            NotifyOutcome::SinkDisabled => self.missed_sink_disabled += 1,
            NotifyOutcome::SuppressedEmptyCache => self.suppressed_empty_cache += 1,
            NotifyOutcome::Failed => self.failed += 1,
        }
    }

    pub fn add(&mut self, other: &NotifyCounters) {
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.missed_sink_disabled += other.missed_sink_disabled;
        self.suppressed_empty_cache += other.suppressed_empty_cache;
        self.failed += other.failed;
    }
}

/// Outcome of committing one account's delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub committed: usize,
    pub notifications: NotifyCounters,
}

/// Persist every item of `delta` and, when `notify` is set, emit its event.
///
/// A cache write failure stops the remaining items. Items staged before it
/// are still flushed and notified, then the write error is returned; they are
/// safe to commit again next cycle.
pub fn commit_delta(
    delta: PollingDelta,
    notify_enabled: bool,
    cache: &dyn CacheStore,
    sink: Option<&dyn NotificationSink>,
) -> Result<CommitReport, PollError> {
    let cache_err = |source: CacheError| PollError::Cache {
        account: delta.account.clone(),
        source,
    };

    let mut written = 0;
    let mut write_error = None;
    for item in &delta.items {
        let image = &item.image;
        if let Err(source) = cache.set_last_digest(
            &delta.account,
            &image.repository,
            &image.tag,
            image.digest.as_deref(),
        ) {
            write_error = Some(source);
            break;
        }
        written += 1;
    }

    let persisted = match (&write_error, cache.flush(&delta.account)) {
        (_, Ok(())) => written,
        (None, Err(source)) => return Err(cache_err(source)),
        (Some(_), Err(err)) => {
            tracing::warn!("{}: flush after failed write also failed: {err}", delta.account);
            0
        }
    };

    let mut report = CommitReport::default();
    for item in &delta.items[..persisted] {
        report.committed += 1;
        tracing::info!("committed: {} ({:?})", item.key, item.change);

        if notify_enabled {
            let outcome = notify(sink, &delta.cached_keys, &item.image, &item.key);
            report.notifications.record(outcome);
        } else {
            report.notifications.skipped += 1;
        }
    }

    match write_error {
        Some(source) => Err(cache_err(source)),
        None => Ok(report),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
