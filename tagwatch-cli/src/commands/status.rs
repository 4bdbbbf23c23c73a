//! `tagwatch status`: cache and threshold visibility per account.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use tagwatch_core::{config, registry, Account, Config};
use tagwatch_poller::{cache, sizer, MarkerFileMigration, MigrationStatus};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = super::home()?;
        let config = config::load_at(&home).context("failed to load config")?;
        let accounts =
            registry::list_accounts_at(&home).context("failed to load account registry")?;

        let report = build_report(&home, &config, &accounts)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&report);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    migration_in_progress: bool,
    default_threshold: u32,
    enforce_threshold: bool,
    accounts: Vec<AccountStatus>,
}

#[derive(Debug, Serialize)]
struct AccountStatus {
    account: String,
    registry: String,
    repositories: usize,
    cached_images: usize,
    unresolved_digests: usize,
    threshold: u32,
    cache_updated_at: Option<DateTime<Utc>>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "account")]
    account: String,
    #[tabled(rename = "registry")]
    registry: String,
    #[tabled(rename = "repos")]
    repositories: usize,
    #[tabled(rename = "cached")]
    cached: usize,
    #[tabled(rename = "no digest")]
    unresolved: usize,
    #[tabled(rename = "threshold")]
    threshold: u32,
    #[tabled(rename = "last commit")]
    last_commit: String,
}

fn build_report(home: &Path, config: &Config, accounts: &[Account]) -> Result<StatusReport> {
    let mut rows = Vec::with_capacity(accounts.len());
    for account in accounts {
        let cache_file = cache::load_at(home, &account.name)
            .with_context(|| format!("failed to load cache for '{}'", account.name))?;
        let cached_images = cache_file.entries.len();
        let unresolved_digests = cache_file.entries.values().filter(|d| d.is_none()).count();

        rows.push(AccountStatus {
            account: account.name.0.clone(),
            registry: account.registry.clone(),
            repositories: account.repositories.len(),
            cached_images,
            unresolved_digests,
            threshold: sizer::upper_threshold(account, config.default_upper_threshold),
            cache_updated_at: (cached_images > 0).then_some(cache_file.updated_at),
        });
    }

    Ok(StatusReport {
        migration_in_progress: MarkerFileMigration::at(home).is_running(),
        default_threshold: config.default_upper_threshold,
        enforce_threshold: config.enforce_threshold,
        accounts: rows,
    })
}

fn print_table(report: &StatusReport) {
    let cached: usize = report.accounts.iter().map(|a| a.cached_images).sum();
    println!(
        "tagwatch v{} | {} accounts | {} cached images | default threshold {}",
        env!("CARGO_PKG_VERSION"),
        report.accounts.len(),
        cached,
        report.default_threshold,
    );
    if report.migration_in_progress {
        println!(
            "{}",
            "cache key migration in progress: poll cycles are skipped"
                .yellow()
                .bold()
        );
    }

    if report.accounts.is_empty() {
        println!("No accounts registered.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .accounts
        .iter()
        .map(|a| StatusTableRow {
            account: a.account.clone(),
            registry: a.registry.clone(),
            repositories: a.repositories,
            cached: a.cached_images,
            unresolved: a.unresolved_digests,
            threshold: a.threshold,
            last_commit: a
                .cache_updated_at
                .map(format_datetime_age)
                .unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.accounts.iter().any(|a| a.cached_images == 0) {
        println!("Accounts with an empty cache are committed silently on their first poll.");
    }
}

fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now()
        .signed_duration_since(timestamp)
        .num_seconds()
        .max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s ago");
    }
    if seconds < 60 * 60 {
        return format!("{}m ago", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h ago", seconds / (60 * 60));
    }
    format!("{}d ago", seconds / (60 * 60 * 24))
}
