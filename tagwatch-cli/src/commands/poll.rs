//! `tagwatch poll`: run one reconcile cycle in the foreground.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use tagwatch_core::AccountName;
use tagwatch_poller::{
    pipeline, AccountOutcome, AccountPollResult, CancelFlag, CycleOutcome, CycleReport, PollMode,
    PollScope,
};

#[derive(Args, Debug)]
pub struct PollArgs {
    /// Poll only this account (default: every account).
    pub account: Option<String>,

    /// Classify only; write nothing and send nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Commit without notifying and without the threshold gate.
    #[arg(long, conflicts_with = "dry_run")]
    pub fast_forward: bool,

    /// Emit the cycle report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl PollArgs {
    fn mode(&self) -> PollMode {
        if self.dry_run {
            PollMode::DryRun
        } else if self.fast_forward {
            PollMode::FastForward
        } else {
            PollMode::Notify
        }
    }

    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let scope = match &self.account {
            Some(name) => PollScope::Account(AccountName::from(name.as_str())),
            None => PollScope::All,
        };

        let report = pipeline::run(&home, scope, self.mode(), &CancelFlag::new())
            .context("poll cycle failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize poll report")?
            );
        } else {
            print_report(&report);
        }

        let failed = report.totals().failed;
        if failed > 0 {
            bail!("{failed} account(s) could not be polled");
        }
        Ok(())
    }
}

fn print_report(report: &CycleReport) {
    let prefix = if report.mode == PollMode::DryRun {
        "[dry-run] "
    } else {
        ""
    };

    match report.outcome {
        CycleOutcome::MigrationInProgress => {
            println!("{prefix}cache key migration in progress; cycle skipped");
            return;
        }
        CycleOutcome::Cancelled => println!("{prefix}cycle cancelled"),
        CycleOutcome::Completed => {}
    }

    if report.accounts.is_empty() && report.outcome == CycleOutcome::Completed {
        println!("No accounts registered. Run `tagwatch account add` first.");
        return;
    }

    for result in &report.accounts {
        print_account(prefix, result);
    }

    let totals = report.totals();
    println!(
        "{prefix}{} account(s): {} new, {} changed, {} committed, {} notified",
        totals.accounts, totals.new, totals.changed, totals.committed, totals.notifications.sent
    );
}

fn print_account(prefix: &str, result: &AccountPollResult) {
    let name = &result.account;
    match &result.outcome {
        AccountOutcome::Committed { report } if report.committed == 0 => {
            println!("{prefix}{} '{name}' — nothing new", "✓".green());
        }
        AccountOutcome::Committed { report } => {
            let n = &report.notifications;
            println!(
                "{prefix}{} '{name}' — {} committed ({} notified, {} skipped, {} suppressed, {} failed)",
                "✓".green(),
                report.committed,
                n.sent,
                n.skipped,
                n.suppressed_empty_cache + n.missed_sink_disabled,
                n.failed,
            );
        }
        AccountOutcome::DryRun { pending } => {
            println!("{prefix}'{name}' — {} pending", pending.len());
            for item in pending {
                println!(
                    "  ~  {}:{} ({:?})",
                    item.image.repository, item.image.tag, item.change
                );
            }
        }
        AccountOutcome::OverThreshold { items, threshold } => {
            println!(
                "{prefix}{} '{name}' — {items} item(s) exceed threshold {threshold}; run with --fast-forward to accept",
                "!".yellow().bold(),
            );
        }
        AccountOutcome::Failed { error } => {
            println!("{prefix}{} '{name}' — {error}", "✗".red().bold());
        }
    }
}
