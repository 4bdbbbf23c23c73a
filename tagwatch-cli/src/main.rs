//! tagwatch: container image tag change detector.
//!
//! # Usage
//!
//! ```text
//! tagwatch account list
//! tagwatch account add <name> --registry <host> [--address URL] --repo <r>... [--no-track-digests] [--threshold N]
//! tagwatch poll [<account>] [--dry-run | --fast-forward] [--json]
//! tagwatch status [--json]
//! tagwatch threshold <account>
//! tagwatch daemon start|stop|status|poll
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    account::AccountCommand, daemon::DaemonCommand, poll::PollArgs, status::StatusArgs,
    threshold::ThresholdArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "tagwatch",
    version,
    about = "Detect new and changed container image tags across registries",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage watched registry accounts.
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Run one poll cycle now.
    Poll(PollArgs),

    /// Show cached images and thresholds per account.
    Status(StatusArgs),

    /// Show the per-cycle item ceiling for an account.
    Threshold(ThresholdArgs),

    /// Run or control the background poller.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Account { command } => commands::account::run(command),
        Commands::Poll(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Threshold(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
