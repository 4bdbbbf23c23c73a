//! Cache keys for observed images.
//!
//! A key is `<prefix>:<schema>:<account>:<repository>:<tag>`, joined by
//! [`KEY_SEPARATOR`]. The digest never participates, so every observation of
//! one tag maps to the same key. The schema segment itself contains the
//! separator (`dockerRegistry:v2`); parsing therefore strips the known
//! `<prefix>:<schema>:` head before splitting the remaining three segments.
//! Repositories and tags containing the separator cannot be keyed; see
//! [`KeyCodec::try_key_for`].

use std::fmt;

use serde::{Deserialize, Serialize};

use tagwatch_core::{AccountName, ObservedImage};

pub const KEY_SEPARATOR: char = ':';
pub const KEY_SCHEMA: &str = "dockerRegistry:v2";

/// Stable identifier of one (account, repository, tag) triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageKey(String);

impl ImageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The segments a key was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    pub account: AccountName,
    pub repository: String,
    pub tag: String,
}

/// Builds and parses [`ImageKey`]s under one namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    prefix: String,
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, account: &AccountName, repository: &str, tag: &str) -> ImageKey {
        ImageKey(format!(
            "{}{account}{KEY_SEPARATOR}{repository}{KEY_SEPARATOR}{tag}",
            self.head()
        ))
    }

    pub fn key_for(&self, image: &ObservedImage) -> ImageKey {
        self.key(&image.account, &image.repository, &image.tag)
    }

    /// Key an observation only if every segment is keyable, so the key
    /// [`parse`](Self::parse)s back to the same triple.
    pub fn try_key_for(&self, image: &ObservedImage) -> Option<ImageKey> {
        let keyable = is_key_segment(image.account.as_str())
            && is_key_segment(&image.repository)
            && is_key_segment(&image.tag);
        keyable.then(|| self.key_for(image))
    }

    /// Common prefix of every key belonging to `account`.
    pub fn account_prefix(&self, account: &AccountName) -> String {
        format!("{}{account}{KEY_SEPARATOR}", self.head())
    }

    /// Split a key back into its segments.
    ///
    /// Returns `None` for keys from another namespace or schema, or with a
    /// segment count other than three after the head.
    pub fn parse(&self, key: &ImageKey) -> Option<KeyParts> {
        let rest = key.0.strip_prefix(&self.head())?;
        let mut segments = rest.split(KEY_SEPARATOR);
        let (account, repository, tag) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() || account.is_empty() || tag.is_empty() {
            return None;
        }
        Some(KeyParts {
            account: AccountName::from(account),
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Accept a stored key string if it belongs to `account`.
    ///
    /// Only the account prefix is checked: a stored key that no longer
    /// parses is still reported so it is never mistaken for a new image.
    pub fn stored_under(&self, account: &AccountName, raw: &str) -> Option<ImageKey> {
        raw.starts_with(&self.account_prefix(account))
            .then(|| ImageKey(raw.to_string()))
    }

    fn head(&self) -> String {
        format!("{}{KEY_SEPARATOR}{KEY_SCHEMA}{KEY_SEPARATOR}", self.prefix)
    }
}

/// A non-empty segment free of [`KEY_SEPARATOR`].
pub fn is_key_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(KEY_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(digest: Option<&str>) -> ObservedImage {
        ObservedImage {
            account: AccountName::from("acme"),
            registry: "registry.example.com".to_string(),
            repository: "team/api".to_string(),
            tag: "latest".to_string(),
            digest: digest.map(str::to_string),
        }
    }

    #[test]
    fn key_layout_is_documented_format() {
        let codec = KeyCodec::new("tagwatch");
        let key = codec.key_for(&image(Some("sha256:aa")));
        assert_eq!(key.as_str(), "tagwatch:dockerRegistry:v2:acme:team/api:latest");
    }

    #[test]
    fn digest_does_not_affect_key() {
        let codec = KeyCodec::new("tagwatch");
        assert_eq!(
            codec.key_for(&image(Some("sha256:aa"))),
            codec.key_for(&image(None))
        );
    }

    #[test]
    fn parse_recovers_segments() {
        let codec = KeyCodec::new("igor");
        let key = codec.key(&AccountName::from("acme"), "library/nginx", "1.25");
        let parts = codec.parse(&key).expect("parse");
        assert_eq!(parts.account, AccountName::from("acme"));
        assert_eq!(parts.repository, "library/nginx");
        assert_eq!(parts.tag, "1.25");
    }

    #[test]
    fn parse_rejects_foreign_prefix_and_extra_segments() {
        let codec = KeyCodec::new("tagwatch");
        let other = KeyCodec::new("igor").key(&AccountName::from("acme"), "r", "t");
        assert!(codec.parse(&other).is_none());
        let extra = codec
            .stored_under(&AccountName::from("acme"), "tagwatch:dockerRegistry:v2:acme:r:t:extra")
            .expect("prefixed key is kept");
        assert!(codec.parse(&extra).is_none());
        assert!(codec
            .stored_under(&AccountName::from("acme"), "tagwatch:dockerRegistry:v1:acme:r:t")
            .is_none());
    }

    #[test]
    fn separator_in_tag_or_repository_is_not_keyable() {
        let codec = KeyCodec::new("tagwatch");
        let mut colon_tag = image(None);
        colon_tag.tag = "v1:rc".to_string();
        assert!(codec.try_key_for(&colon_tag).is_none());

        let mut colon_repo = image(None);
        colon_repo.repository = "team:api".to_string();
        assert!(codec.try_key_for(&colon_repo).is_none());

        let mut empty_tag = image(None);
        empty_tag.tag.clear();
        assert!(codec.try_key_for(&empty_tag).is_none());

        let plain = image(Some("sha256:aa"));
        let key = codec.try_key_for(&plain).expect("keyable");
        assert_eq!(codec.parse(&key).expect("parse").tag, "latest");
    }

    #[test]
    fn account_prefix_matches_only_that_account() {
        let codec = KeyCodec::new("tagwatch");
        let key = codec.key(&AccountName::from("acme"), "r", "t");
        let sibling = codec.key(&AccountName::from("acme-staging"), "r", "t");
        let prefix = codec.account_prefix(&AccountName::from("acme"));
        assert!(key.as_str().starts_with(&prefix));
        assert!(!sibling.as_str().starts_with(&prefix));
    }
}
