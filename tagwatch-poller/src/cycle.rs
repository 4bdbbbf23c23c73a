//! Poll cycle orchestration.
//!
//! One cycle:
//! 1. Refresh the account registry and take a snapshot.
//! 2. For each account: stop if cancelled; stop the whole cycle if a cache-key
//!    migration is running; otherwise generate → commit.
//!
//! Account failures are recorded in the [`CycleReport`] and never stop the
//! remaining accounts. Only a registry refresh failure or an unknown account
//! in [`PollScope::Account`] fails the cycle itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tagwatch_core::{Account, AccountName};

use crate::accounts::AccountRegistry;
use crate::commit::{CommitReport, NotifyCounters};
use crate::delta::{DeltaStats, ImageDelta};
use crate::error::PollError;
use crate::migration::MigrationStatus;
use crate::monitor::PollingMonitor;

/// Shared flag that abandons a cycle before its next account.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which accounts a cycle covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollScope {
    All,
    Account(AccountName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// Commit and notify.
    Notify,
    /// Commit without notifying; drains a backlog silently.
    FastForward,
    /// Classify only; nothing is written or sent.
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOptions {
    pub mode: PollMode,
    /// Skip commits whose delta exceeds the account threshold (notify mode only).
    pub enforce_threshold: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            mode: PollMode::Notify,
            enforce_threshold: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AccountOutcome {
    Committed { report: CommitReport },
    DryRun { pending: Vec<ImageDelta> },
    OverThreshold { items: usize, threshold: u32 },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountPollResult {
    pub account: AccountName,
    pub threshold: u32,
    pub stats: Option<DeltaStats>,
    pub outcome: AccountOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    MigrationInProgress,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: PollMode,
    pub outcome: CycleOutcome,
    pub accounts: Vec<AccountPollResult>,
}

/// Sums over every account of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleTotals {
    pub accounts: usize,
    pub failed: usize,
    pub over_threshold: usize,
    pub new: usize,
    pub changed: usize,
    pub committed: usize,
    pub notifications: NotifyCounters,
}

impl CycleReport {
    pub fn totals(&self) -> CycleTotals {
        let mut totals = CycleTotals {
            accounts: self.accounts.len(),
            ..CycleTotals::default()
        };
        for result in &self.accounts {
            if let Some(stats) = &result.stats {
                totals.new += stats.new;
                totals.changed += stats.changed;
            }
            match &result.outcome {
                AccountOutcome::Committed { report } => {
                    totals.committed += report.committed;
                    totals.notifications.add(&report.notifications);
                }
                AccountOutcome::OverThreshold { .. } => totals.over_threshold += 1,
                AccountOutcome::Failed { .. } => totals.failed += 1,
                AccountOutcome::DryRun { .. } => {}
            }
        }
        totals
    }
}

/// Run one poll cycle over `scope`.
pub fn run_cycle(
    monitor: &dyn PollingMonitor,
    registry: &mut dyn AccountRegistry,
    migration: Option<&dyn MigrationStatus>,
    scope: &PollScope,
    options: CycleOptions,
    cancel: &CancelFlag,
) -> Result<CycleReport, PollError> {
    let started_at = Utc::now();
    registry.refresh()?;
    let snapshot = registry.list();

    let accounts: Vec<&Account> = match scope {
        PollScope::All => snapshot.accounts().iter().collect(),
        PollScope::Account(name) => vec![monitor.partition(&snapshot, name)?],
    };

    let mut outcome = CycleOutcome::Completed;
    let mut results = Vec::with_capacity(accounts.len());
    for account in accounts {
        if cancel.is_cancelled() {
            tracing::info!("poll cycle cancelled before account '{}'", account.name);
            outcome = CycleOutcome::Cancelled;
            break;
        }
        if migration.is_some_and(|m| m.is_running()) {
            tracing::warn!("skipping poll cycle: cache key migration is in progress");
            outcome = CycleOutcome::MigrationInProgress;
            break;
        }
        results.push(poll_single(monitor, account, options));
    }

    Ok(CycleReport {
        started_at,
        finished_at: Utc::now(),
        mode: options.mode,
        outcome,
        accounts: results,
    })
}

/// Generate → commit for one account. Never fails; errors become
/// [`AccountOutcome::Failed`].
pub fn poll_single(
    monitor: &dyn PollingMonitor,
    account: &Account,
    options: CycleOptions,
) -> AccountPollResult {
    let threshold = monitor.upper_threshold(account);
    let result = |stats, outcome| AccountPollResult {
        account: account.name.clone(),
        threshold,
        stats,
        outcome,
    };

    let delta = match monitor.generate_delta(account) {
        Ok(delta) => delta,
        Err(err) => {
            tracing::warn!("skipping account '{}' this cycle: {err}", account.name);
            return result(
                None,
                AccountOutcome::Failed {
                    error: err.to_string(),
                },
            );
        }
    };
    let stats = Some(delta.stats);

    match options.mode {
        PollMode::DryRun => {
            return result(
                stats,
                AccountOutcome::DryRun {
                    pending: delta.items,
                },
            );
        }
        PollMode::Notify if options.enforce_threshold && delta.len() > threshold as usize => {
            tracing::warn!(
                "account '{}': {} item(s) to commit exceed upper threshold {threshold}; \
                 skipping commit (fast-forward to accept)",
                account.name,
                delta.len()
            );
            return result(
                stats,
                AccountOutcome::OverThreshold {
                    items: delta.len(),
                    threshold,
                },
            );
        }
        PollMode::Notify | PollMode::FastForward => {}
    }

    let notify = options.mode == PollMode::Notify;
    match monitor.commit_delta(delta, notify) {
        Ok(report) => {
            if report.committed > 0 {
                tracing::info!(
                    "account '{}': committed {} item(s), {} notification(s) sent",
                    account.name,
                    report.committed,
                    report.notifications.sent
                );
            }
            result(stats, AccountOutcome::Committed { report })
        }
        Err(err) => {
            tracing::warn!("commit for account '{}' failed: {err}", account.name);
            result(
                stats,
                AccountOutcome::Failed {
                    error: err.to_string(),
                },
            )
        }
    }
}
