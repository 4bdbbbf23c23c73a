//! `tagwatch threshold <account>`: partition sizer report.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use tagwatch_core::{config, registry, AccountName};
use tagwatch_poller::sizer;

#[derive(Args, Debug)]
pub struct ThresholdArgs {
    /// Account to report on.
    pub account: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ThresholdReport {
    account: String,
    threshold: u32,
    source: &'static str,
    enforced: bool,
}

impl ThresholdArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = config::load_at(&home).context("failed to load config")?;
        let name = AccountName::from(self.account.clone());
        let account = registry::load_account_at(&home, &name)
            .with_context(|| format!("unknown account '{}'", self.account))?;

        let threshold = sizer::upper_threshold(&account, config.default_upper_threshold);
        let source = match account.item_upper_threshold {
            Some(n) if n > 0 => "account",
            _ => "default",
        };
        let report = ThresholdReport {
            account: account.name.0.clone(),
            threshold,
            source,
            enforced: config.enforce_threshold,
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize threshold")?
            );
            return Ok(());
        }

        println!(
            "{}: {} item(s) per cycle ({})",
            report.account, report.threshold, report.source
        );
        if !report.enforced {
            println!("threshold is reported only; enforce_threshold is off in config.yaml");
        }
        Ok(())
    }
}
