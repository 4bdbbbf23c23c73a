//! Per-account delta generation.
//!
//! Lists the account's images, snapshots the cached key set, and keeps every
//! observation classified [`Change::New`] or [`Change::Changed`]. Listing
//! failures abort before anything is classified, so an account either gets a
//! complete delta or none at all.
//!
//! Observations that cannot be keyed for the account (another account's
//! name, or a repository or tag containing the key separator) are skipped
//! like null entries.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use tagwatch_core::{Account, AccountName, ObservedImage};

use crate::cache::CacheStore;
use crate::classifier::{classify, Change};
use crate::error::PollError;
use crate::key::{ImageKey, KeyCodec};
use crate::source::RemoteSource;

/// One observation to commit this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageDelta {
    pub key: ImageKey,
    pub image: ObservedImage,
    pub change: Change,
}

/// Classification tallies for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeltaStats {
    pub observed: usize,
    /// Null entries plus observations that cannot be keyed for the account.
    pub skipped_null: usize,
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
}

/// Everything the commit step needs for one account.
#[derive(Debug, Clone)]
pub struct PollingDelta {
    pub account: AccountName,
    pub items: Vec<ImageDelta>,
    /// Keys cached for the account when the cycle started.
    pub cached_keys: BTreeSet<ImageKey>,
    pub stats: DeltaStats,
}

impl PollingDelta {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Compute the delta for `account`.
pub fn generate_delta(
    account: &Account,
    source: &dyn RemoteSource,
    cache: &dyn CacheStore,
    codec: &KeyCodec,
) -> Result<PollingDelta, PollError> {
    let listed = source
        .list_images(account)
        .map_err(|source| PollError::RemoteListing {
            account: account.name.clone(),
            source,
        })?;
    let cached_keys = cache
        .images(&account.name)
        .map_err(|source| PollError::Cache {
            account: account.name.clone(),
            source,
        })?;

    let mut stats = DeltaStats::default();
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    for observed in listed {
        let Some(image) = observed else {
            stats.skipped_null += 1;
            continue;
        };
        if image.account != account.name {
            tracing::warn!(
                "{}: skipping {}:{} listed for account '{}'",
                account.name,
                image.repository,
                image.tag,
                image.account
            );
            stats.skipped_null += 1;
            continue;
        }
        let Some(key) = codec.try_key_for(&image) else {
            tracing::debug!(
                "{}: skipping unkeyable {:?}:{:?}",
                account.name,
                image.repository,
                image.tag
            );
            stats.skipped_null += 1;
            continue;
        };
        stats.observed += 1;

        let change = classify(&cached_keys, &key, &image, account.track_digests, || {
            cache.last_digest(&account.name, &image.repository, &image.tag)
        })
        .map_err(|source| PollError::Cache {
            account: account.name.clone(),
            source,
        })?;
        tracing::debug!("{key}: {change:?} (digest {:?})", image.digest);

        match change {
            Change::New => stats.new += 1,
            Change::Changed => stats.changed += 1,
            Change::Unchanged => stats.unchanged += 1,
        }
        if change.is_commit_candidate() {
            if !seen.insert(key.clone()) {
                tracing::debug!("{key} listed more than once by the source; last one wins");
            }
            items.push(ImageDelta { key, image, change });
        }
    }

    Ok(PollingDelta {
        account: account.name.clone(),
        items,
        cached_keys,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::SourceError;

    struct Fixed(Mutex<Option<Result<Vec<Option<ObservedImage>>, SourceError>>>);

    impl Fixed {
        fn ok(images: Vec<Option<ObservedImage>>) -> Self {
            Self(Mutex::new(Some(Ok(images))))
        }

        fn failing() -> Self {
            Self(Mutex::new(Some(Err(SourceError::Http {
                url: "https://r.example/v2/r/tags/list".to_string(),
                message: "connection refused".to_string(),
            }))))
        }
    }

    impl RemoteSource for Fixed {
        fn list_images(
            &self,
            _account: &Account,
        ) -> Result<Vec<Option<ObservedImage>>, SourceError> {
            self.0.lock().unwrap().take().expect("listed once")
        }
    }

    fn image(tag: &str, digest: Option<&str>) -> ObservedImage {
        ObservedImage {
            account: AccountName::from("acme"),
            registry: "r.example".to_string(),
            repository: "r".to_string(),
            tag: tag.to_string(),
            digest: digest.map(str::to_string),
        }
    }

    fn setup() -> (Account, KeyCodec, MemoryCacheStore) {
        let codec = KeyCodec::new("tagwatch");
        let cache = MemoryCacheStore::new(codec.clone());
        (Account::new("acme", "r.example"), codec, cache)
    }

    #[test]
    fn new_changed_and_unchanged_are_sorted_out() {
        let (account, codec, cache) = setup();
        let name = account.name.clone();
        cache.set_last_digest(&name, "r", "stable", Some("sha1")).unwrap();
        cache.set_last_digest(&name, "r", "moving", Some("sha1")).unwrap();

        let source = Fixed::ok(vec![
            Some(image("stable", Some("sha1"))),
            Some(image("moving", Some("sha2"))),
            Some(image("fresh", Some("sha3"))),
            None,
        ]);
        let delta = generate_delta(&account, &source, &cache, &codec).unwrap();

        let tags: Vec<_> = delta.items.iter().map(|d| d.image.tag.as_str()).collect();
        assert_eq!(tags, vec!["moving", "fresh"]);
        assert_eq!(delta.items[0].change, Change::Changed);
        assert_eq!(delta.items[1].change, Change::New);
        assert_eq!(
            delta.stats,
            DeltaStats {
                observed: 3,
                skipped_null: 1,
                new: 1,
                changed: 1,
                unchanged: 1,
            }
        );
        assert_eq!(delta.cached_keys.len(), 2);
    }

    #[test]
    fn listing_failure_produces_no_delta() {
        let (account, codec, cache) = setup();
        let err = generate_delta(&account, &Fixed::failing(), &cache, &codec).unwrap_err();
        assert!(matches!(err, PollError::RemoteListing { .. }));
    }

    #[test]
    fn duplicate_tags_are_both_kept() {
        let (account, codec, cache) = setup();
        let source = Fixed::ok(vec![
            Some(image("latest", Some("sha1"))),
            Some(image("latest", Some("sha2"))),
        ]);
        let delta = generate_delta(&account, &source, &cache, &codec).unwrap();
        assert_eq!(delta.len(), 2);
        assert_eq!(delta.items[0].key, delta.items[1].key);
    }

    #[test]
    fn unkeyable_and_foreign_observations_are_skipped() {
        let (account, codec, cache) = setup();
        let mut foreign = image("v1", Some("sha1"));
        foreign.account = AccountName::from("globex");
        let mut colon_repo = image("v1", Some("sha1"));
        colon_repo.repository = "team:api".to_string();
        let source = Fixed::ok(vec![
            Some(image("v1:rc", Some("sha1"))),
            Some(colon_repo),
            Some(foreign),
            Some(image("", Some("sha1"))),
            Some(image("v2", Some("sha2"))),
        ]);

        let delta = generate_delta(&account, &source, &cache, &codec).unwrap();

        assert_eq!(delta.len(), 1);
        assert_eq!(delta.items[0].image.tag, "v2");
        assert_eq!(delta.stats.skipped_null, 4);
        assert_eq!(delta.stats.observed, 1);
        for item in &delta.items {
            let parts = codec.parse(&item.key).expect("keys parse back");
            assert_eq!(parts.account, account.name);
        }
    }

    #[test]
    fn null_observed_digest_for_cached_tag_is_not_a_change() {
        let (account, codec, cache) = setup();
        cache
            .set_last_digest(&account.name, "r", "latest", Some("sha1"))
            .unwrap();
        let source = Fixed::ok(vec![Some(image("latest", None))]);
        let delta = generate_delta(&account, &source, &cache, &codec).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.stats.unchanged, 1);
    }
}
