//! Account registry collaborator.
//!
//! The cycle calls [`AccountRegistry::refresh`] once and then works from the
//! [`AccountSnapshot`] returned by [`AccountRegistry::list`], so edits made to
//! the registry mid-cycle only show up next cycle.

use std::path::PathBuf;

use tagwatch_core::{registry, AccountSnapshot};

use crate::error::PollError;

pub trait AccountRegistry: Send {
    fn refresh(&mut self) -> Result<(), PollError>;
    fn list(&self) -> AccountSnapshot;
}

/// Registry backed by `<home>/.tagwatch/accounts/*.yaml`.
#[derive(Debug)]
pub struct FileAccountRegistry {
    home: PathBuf,
    snapshot: AccountSnapshot,
}

impl FileAccountRegistry {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            snapshot: AccountSnapshot::default(),
        }
    }
}

impl AccountRegistry for FileAccountRegistry {
    fn refresh(&mut self) -> Result<(), PollError> {
        let accounts = registry::list_accounts_at(&self.home)?;
        tracing::debug!("refreshed account registry: {} account(s)", accounts.len());
        self.snapshot = AccountSnapshot::new(accounts);
        Ok(())
    }

    fn list(&self) -> AccountSnapshot {
        self.snapshot.clone()
    }
}

/// Fixed account list, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAccountRegistry {
    snapshot: AccountSnapshot,
}

impl StaticAccountRegistry {
    pub fn new(snapshot: AccountSnapshot) -> Self {
        Self { snapshot }
    }
}

impl AccountRegistry for StaticAccountRegistry {
    fn refresh(&mut self) -> Result<(), PollError> {
        Ok(())
    }

    fn list(&self) -> AccountSnapshot {
        self.snapshot.clone()
    }
}
