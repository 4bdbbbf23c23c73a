//! Change classification of one observed image against prior cache state.
//!
//! A `None` digest on either side of a comparison means a manifest lookup
//! failed, now or in an earlier cycle. Such comparisons are indeterminate and
//! classify as [`Change::Unchanged`], never as [`Change::Changed`].

use std::collections::BTreeSet;

use serde::Serialize;

use tagwatch_core::ObservedImage;

use crate::key::ImageKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    New,
    Changed,
    Unchanged,
}

impl Change {
    /// Whether the observation belongs in the delta.
    pub fn is_commit_candidate(self) -> bool {
        matches!(self, Change::New | Change::Changed)
    }
}

/// Classify `observed` against the account's cached keys.
///
/// `previous_digest` is only invoked when the key is cached and digest
/// tracking is on, so the cache is not read for new keys.
pub fn classify<E>(
    cached_keys: &BTreeSet<ImageKey>,
    key: &ImageKey,
    observed: &ObservedImage,
    track_digests: bool,
    previous_digest: impl FnOnce() -> Result<Option<String>, E>,
) -> Result<Change, E> {
    if !cached_keys.contains(key) {
        return Ok(Change::New);
    }
    if !track_digests {
        return Ok(Change::Unchanged);
    }
    let previous = previous_digest()?;
    Ok(compare_digests(previous.as_deref(), observed.digest.as_deref()))
}

/// Digest comparison for a key already present in the cache.
pub fn compare_digests(previous: Option<&str>, observed: Option<&str>) -> Change {
    match (previous, observed) {
        (Some(previous), Some(observed)) if previous != observed => Change::Changed,
        _ => Change::Unchanged,
    }
}
