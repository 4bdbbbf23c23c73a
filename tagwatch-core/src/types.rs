//! Domain types for tagwatch.
//!
//! All types are serializable/deserializable via serde + serde_yaml.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a polled account (one partition of work).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountName(pub String);

impl AccountName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AccountName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

fn default_track_digests() -> bool {
    true
}

/// A registry account whose image tags are reconciled against the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: AccountName,
    /// Registry host as it appears in artifact references (e.g. `index.docker.io`).
    pub registry: String,
    /// API base URL; `https://<registry>` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Compare manifest digests of already-known tags, not just tag presence.
    #[serde(default = "default_track_digests")]
    pub track_digests: bool,
    /// Per-account ceiling on items committed in one cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_upper_threshold: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Account with defaults for everything but identity and location.
    pub fn new(name: impl Into<AccountName>, registry: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            registry: registry.into(),
            address: None,
            repositories: vec![],
            track_digests: true,
            item_upper_threshold: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Base URL of the registry API, without a trailing slash.
    pub fn api_base(&self) -> String {
        match &self.address {
            Some(address) => address.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.registry.trim_end_matches('/')),
        }
    }
}

/// One tag observed on the remote source during a poll.
///
/// `digest` is `None` when the manifest lookup for the tag failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedImage {
    pub account: AccountName,
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
}

/// Immutable view of the account registry taken once per cycle.
///
/// Cheap to clone; every clone shares the same account list.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    accounts: Arc<[Account]>,
}

impl AccountSnapshot {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts: accounts.into(),
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn get(&self, name: &AccountName) -> Option<&Account> {
        self.accounts.iter().find(|a| &a.name == name)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
