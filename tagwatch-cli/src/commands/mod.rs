pub mod account;
pub mod daemon;
pub mod poll;
pub mod status;
pub mod threshold;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
