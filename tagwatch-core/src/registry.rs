//! Per-account YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tagwatch/
//!   accounts/
//!     <account_name>.yaml   (one file per account: mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::RegistryError;
use crate::types::{Account, AccountName};

/// Separator used by cache keys; account names may not contain it.
pub const RESERVED_NAME_CHAR: char = ':';

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.tagwatch/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".tagwatch")
}

/// `<home>/.tagwatch/accounts/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn accounts_dir_at(home: &Path) -> Result<PathBuf, RegistryError> {
    let dir = root_at(home).join("accounts");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.tagwatch/accounts/<account>.yaml`: pure, no I/O.
pub fn account_path_at(home: &Path, account: &AccountName) -> PathBuf {
    root_at(home)
        .join("accounts")
        .join(format!("{}.yaml", account.0))
}

/// Reject names that cannot be used as a file name and a cache key segment.
pub fn validate_account_name(name: &AccountName) -> Result<(), RegistryError> {
    let reason = if name.0.is_empty() {
        Some("must not be empty")
    } else if name.0.contains(RESERVED_NAME_CHAR) {
        Some("must not contain ':'")
    } else if name.0.contains(['/', '\\']) || name.0 == "." || name.0 == ".." {
        Some("must be a plain file name")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(RegistryError::InvalidAccountName {
            name: name.0.clone(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Reject an account whose name or repositories cannot be cache key segments.
pub fn validate_account(account: &Account) -> Result<(), RegistryError> {
    validate_account_name(&account.name)?;
    for repository in &account.repositories {
        let reason = if repository.is_empty() {
            "must not be empty"
        } else if repository.contains(RESERVED_NAME_CHAR) {
            "must not contain ':'"
        } else {
            continue;
        };
        return Err(RegistryError::InvalidRepository {
            account: account.name.0.clone(),
            repository: repository.clone(),
            reason,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single account from `<home>/.tagwatch/accounts/<account>.yaml`.
///
/// Returns `RegistryError::AccountNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn load_account_at(home: &Path, account: &AccountName) -> Result<Account, RegistryError> {
    let path = account_path_at(home, account);
    if !path.exists() {
        return Err(RegistryError::AccountNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
}

/// `load_account_at` convenience wrapper.
pub fn load_account(account: &AccountName) -> Result<Account, RegistryError> {
    load_account_at(&home()?, account)
}

/// Read every `<home>/.tagwatch/accounts/*.yaml`, sorted by account name.
///
/// Skips `.yaml.tmp` leftovers from interrupted saves.
pub fn list_accounts_at(home: &Path) -> Result<Vec<Account>, RegistryError> {
    let dir = root_at(home).join("accounts");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut accounts = Vec::new();
    for entry in entries {
        let fname = entry.file_name();
        if !fname.to_string_lossy().ends_with(".yaml") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path())?;
        let account: Account = serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse {
            path: entry.path(),
            source: e,
        })?;
        validate_account_name(&account.name)?;
        accounts.push(account);
    }
    accounts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(accounts)
}

/// `list_accounts_at` convenience wrapper.
pub fn list_accounts() -> Result<Vec<Account>, RegistryError> {
    list_accounts_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save an account to `<home>/.tagwatch/accounts/<account>.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_account_at(home: &Path, account: &Account) -> Result<(), RegistryError> {
    validate_account(account)?;
    accounts_dir_at(home)?;
    let path = account_path_at(home, &account.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", account.name.0));

    let yaml = serde_yaml::to_string(account)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_account_at` convenience wrapper.
pub fn save_account(account: &Account) -> Result<(), RegistryError> {
    save_account_at(&home()?, account)
}

// ---------------------------------------------------------------------------
// 4. Add
// ---------------------------------------------------------------------------

/// Register `account`, replacing an existing definition of the same name.
///
/// `created_at` of an existing definition is preserved.
pub fn add_account_at(home: &Path, mut account: Account) -> Result<Account, RegistryError> {
    validate_account(&account)?;
    let now = Utc::now();
    account.updated_at = now;
    account.created_at = match load_account_at(home, &account.name) {
        Ok(existing) => existing.created_at,
        Err(RegistryError::AccountNotFound { .. }) => now,
        Err(err) => return Err(err),
    };
    save_account_at(home, &account)?;
    Ok(account)
}

/// `add_account_at` convenience wrapper.
pub fn add_account(account: Account) -> Result<Account, RegistryError> {
    add_account_at(&home()?, account)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
