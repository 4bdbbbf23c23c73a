//! Cache store: last committed digest per image key.
//!
//! [`FileCacheStore`] persists one `CacheFile` JSON document per account at
//! `<home>/.tagwatch/cache/<account>.json`, written with the atomic `.tmp` +
//! rename pattern used by the account registry. [`CacheStore::set_last_digest`]
//! stages entries in memory; [`CacheStore::flush`] writes each dirty account
//! file once.
//!
//! Neither store can delete a key: entries are created on first commit and
//! overwritten afterwards.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tagwatch_core::{registry::root_at, AccountName};

use crate::error::{cache_io_err, CacheError};
use crate::key::{ImageKey, KeyCodec};

/// Persistent cache of observed digests.
pub trait CacheStore: Send + Sync {
    /// Every key currently cached for `account`.
    fn images(&self, account: &AccountName) -> Result<BTreeSet<ImageKey>, CacheError>;

    /// Last committed digest for the tag; `None` when absent or stored as null.
    fn last_digest(
        &self,
        account: &AccountName,
        repository: &str,
        tag: &str,
    ) -> Result<Option<String>, CacheError>;

    /// Create or overwrite the entry for the tag.
    ///
    /// Stores may stage the write until [`flush`](Self::flush).
    fn set_last_digest(
        &self,
        account: &AccountName,
        repository: &str,
        tag: &str,
        digest: Option<&str>,
    ) -> Result<(), CacheError>;

    /// Persist writes staged for `account`.
    fn flush(&self, _account: &AccountName) -> Result<(), CacheError> {
        Ok(())
    }
}

/// On-disk cache payload for one account: key string to digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheFile {
    pub updated_at: DateTime<Utc>,
    pub entries: BTreeMap<String, Option<String>>,
}

impl CacheFile {
    fn empty() -> Self {
        Self {
            updated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

/// Path to the cache JSON for a given account, rooted at `home`.
///
/// `~/.tagwatch/cache/<account>.json`
pub fn cache_path_at(home: &Path, account: &AccountName) -> PathBuf {
    root_at(home).join("cache").join(format!("{account}.json"))
}

/// Load the cache file for `account`.
///
/// Returns an empty cache if the file does not yet exist.
pub fn load_at(home: &Path, account: &AccountName) -> Result<CacheFile, CacheError> {
    let path = cache_path_at(home, account);
    if !path.exists() {
        return Ok(CacheFile::empty());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| cache_io_err(&path, e))?;
    serde_json::from_str(&contents).map_err(|source| CacheError::Json { path, source })
}

/// Save the cache file for `account` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(home: &Path, account: &AccountName, cache: &CacheFile) -> Result<(), CacheError> {
    let path = cache_path_at(home, account);
    let Some(dir) = path.parent() else {
        return Err(cache_io_err(
            path,
            std::io::Error::other("invalid cache path"),
        ));
    };

    std::fs::create_dir_all(dir).map_err(|e| cache_io_err(dir, e))?;

    let json = serde_json::to_string_pretty(cache).map_err(|source| CacheError::Json {
        path: path.clone(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| cache_io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| cache_io_err(&path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// FileCacheStore
// ---------------------------------------------------------------------------

/// JSON-file cache store, one file per account.
///
/// [`CacheStore::images`] re-reads the account's file, so each cycle starts
/// from what is on disk; digest lookups within the cycle reuse that copy.
/// An account with unflushed writes is not re-read.
#[derive(Debug)]
pub struct FileCacheStore {
    home: PathBuf,
    codec: KeyCodec,
    loaded: Mutex<HashMap<AccountName, Loaded>>,
}

#[derive(Debug)]
struct Loaded {
    file: CacheFile,
    dirty: bool,
}

impl FileCacheStore {
    pub fn new(home: impl Into<PathBuf>, codec: KeyCodec) -> Self {
        Self {
            home: home.into(),
            codec,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    fn with_account<T>(
        &self,
        account: &AccountName,
        reload: bool,
        f: impl FnOnce(&mut Loaded) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut loaded = self.loaded.lock().map_err(|_| CacheError::Poisoned)?;
        if reload && loaded.get(account).is_some_and(|l| !l.dirty) {
            loaded.remove(account);
        }
        let entry = match loaded.entry(account.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Loaded {
                file: load_at(&self.home, account)?,
                dirty: false,
            }),
        };
        f(entry)
    }
}

impl CacheStore for FileCacheStore {
    fn images(&self, account: &AccountName) -> Result<BTreeSet<ImageKey>, CacheError> {
        self.with_account(account, true, |loaded| {
            Ok(loaded
                .file
                .entries
                .keys()
                .filter_map(|raw| self.codec.stored_under(account, raw))
                .collect())
        })
    }

    fn last_digest(
        &self,
        account: &AccountName,
        repository: &str,
        tag: &str,
    ) -> Result<Option<String>, CacheError> {
        let key = self.codec.key(account, repository, tag);
        self.with_account(account, false, |loaded| {
            Ok(loaded.file.entries.get(key.as_str()).cloned().flatten())
        })
    }

    fn set_last_digest(
        &self,
        account: &AccountName,
        repository: &str,
        tag: &str,
        digest: Option<&str>,
    ) -> Result<(), CacheError> {
        let key = self.codec.key(account, repository, tag);
        self.with_account(account, false, |loaded| {
            loaded
                .file
                .entries
                .insert(key.as_str().to_string(), digest.map(str::to_string));
            loaded.dirty = true;
            Ok(())
        })
    }

    fn flush(&self, account: &AccountName) -> Result<(), CacheError> {
        let mut loaded = self.loaded.lock().map_err(|_| CacheError::Poisoned)?;
        let Some(staged) = loaded.get_mut(account).filter(|l| l.dirty) else {
            return Ok(());
        };
        staged.file.updated_at = Utc::now();
        save_at(&self.home, account, &staged.file)?;
        staged.dirty = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCacheStore
// ---------------------------------------------------------------------------

/// In-process cache store; contents are lost when dropped.
#[derive(Debug)]
pub struct MemoryCacheStore {
    codec: KeyCodec,
    entries: Mutex<BTreeMap<ImageKey, Option<String>>>,
}

impl MemoryCacheStore {
    pub fn new(codec: KeyCodec) -> Self {
        Self {
            codec,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Copy of every entry, across all accounts.
    pub fn entries(&self) -> Result<BTreeMap<ImageKey, Option<String>>, CacheError> {
        Ok(self.entries.lock().map_err(|_| CacheError::Poisoned)?.clone())
    }
}

impl CacheStore for MemoryCacheStore {
    fn images(&self, account: &AccountName) -> Result<BTreeSet<ImageKey>, CacheError> {
        let prefix = self.codec.account_prefix(account);
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries
            .keys()
            .filter(|key| key.as_str().starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn last_digest(
        &self,
        account: &AccountName,
        repository: &str,
        tag: &str,
    ) -> Result<Option<String>, CacheError> {
        let key = self.codec.key(account, repository, tag);
        let entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(&key).cloned().flatten())
    }

    fn set_last_digest(
        &self,
        account: &AccountName,
        repository: &str,
        tag: &str,
        digest: Option<&str>,
    ) -> Result<(), CacheError> {
        let key = self.codec.key(account, repository, tag);
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key, digest.map(str::to_string));
        Ok(())
    }
}
