//! `tagwatch account list` and `tagwatch account add <name>`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use tagwatch_core::{registry, Account, AccountName};

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// List every registered account.
    List,

    /// Register an account, or update it if the name already exists.
    Add(AddArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Account name; also the cache file name.
    pub name: String,

    /// Registry host used in artifact references (e.g. "ghcr.io").
    #[arg(long)]
    pub registry: String,

    /// Registry API base URL. Defaults to `https://<registry>`.
    #[arg(long)]
    pub address: Option<String>,

    /// Repository to watch; repeat for more than one.
    #[arg(long = "repo", short = 'r', value_name = "REPOSITORY", required = true)]
    pub repositories: Vec<String>,

    /// Only detect new tags; never compare digests.
    #[arg(long)]
    pub no_track_digests: bool,

    /// Per-cycle item ceiling for this account (0 = use the global default).
    #[arg(long)]
    pub threshold: Option<u32>,
}

#[derive(Tabled)]
struct AccountRow {
    #[tabled(rename = "account")]
    name: String,
    #[tabled(rename = "registry")]
    registry: String,
    #[tabled(rename = "repositories")]
    repositories: String,
    #[tabled(rename = "digests")]
    digests: &'static str,
    #[tabled(rename = "threshold")]
    threshold: String,
}

pub fn run(cmd: AccountCommand) -> Result<()> {
    let home = super::home()?;
    match cmd {
        AccountCommand::List => list(&home),
        AccountCommand::Add(args) => add(&home, args),
    }
}

fn list(home: &std::path::Path) -> Result<()> {
    let accounts = registry::list_accounts_at(home).context("failed to load account registry")?;

    if accounts.is_empty() {
        println!("No accounts registered.");
        println!("Run: tagwatch account add <name> --registry <host> --repo <repository>");
        return Ok(());
    }

    let rows: Vec<AccountRow> = accounts.iter().map(account_row).collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn account_row(account: &Account) -> AccountRow {
    AccountRow {
        name: account.name.0.clone(),
        registry: account.registry.clone(),
        repositories: account.repositories.join(", "),
        digests: if account.track_digests { "tracked" } else { "off" },
        threshold: account
            .item_upper_threshold
            .filter(|n| *n > 0)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "default".to_string()),
    }
}

fn add(home: &std::path::Path, args: AddArgs) -> Result<()> {
    let mut account = Account::new(AccountName::from(args.name.clone()), args.registry);
    account.address = args.address;
    account.repositories = args.repositories;
    account.track_digests = !args.no_track_digests;
    account.item_upper_threshold = args.threshold;

    let account = registry::add_account_at(home, account)
        .with_context(|| format!("failed to add account '{}'", args.name))?;

    println!(
        "✓ Added account '{}' ({} repositor{})",
        account.name,
        account.repositories.len(),
        if account.repositories.len() == 1 { "y" } else { "ies" }
    );
    Ok(())
}
