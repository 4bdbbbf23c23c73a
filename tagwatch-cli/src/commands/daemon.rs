//! `tagwatch daemon`: background poller lifecycle.

use anyhow::{Context, Result};
use clap::Subcommand;

use tagwatch_daemon::paths::socket_path;
use tagwatch_daemon::{start_blocking, DaemonClient, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask the running daemon to poll now and print the cycle summary.
    Poll {
        /// Poll only this account.
        account: Option<String>,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;
    let client = DaemonClient::at(&home);

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match client.stop() {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match client.status() {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Poll { account } => {
            let summary = client.poll(account).context("daemon poll failed")?;
            print_json(&summary)?;
        }
    }

    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon JSON")?
    );
    Ok(())
}
