//! Shared poll entrypoint used by CLI and daemon.
//!
//! Wires the file- and HTTP-backed collaborators under `<home>/.tagwatch/`
//! into an [`ImageTagMonitor`] and runs one cycle.

use std::path::Path;
use std::sync::Arc;

use tagwatch_core::{config, Config};

use crate::accounts::FileAccountRegistry;
use crate::cache::FileCacheStore;
use crate::cycle::{run_cycle, CancelFlag, CycleOptions, CycleReport, PollMode, PollScope};
use crate::key::KeyCodec;
use crate::migration::MarkerFileMigration;
use crate::monitor::ImageTagMonitor;
use crate::sink;
use crate::source::RegistrySource;
use crate::PollError;

/// Build the monitor described by `config`.
pub fn build_monitor(home: &Path, config: &Config) -> ImageTagMonitor {
    let codec = KeyCodec::new(config.cache_prefix.clone());
    let cache = Arc::new(FileCacheStore::new(home, codec.clone()));
    let source = Arc::new(RegistrySource::new(config.http_timeout()));
    ImageTagMonitor::new(source, cache, codec, config.default_upper_threshold)
        .with_sink(sink::from_config(config, home))
}

/// Cycle options for `mode`, with the threshold gate taken from `config`.
pub fn options_for(config: &Config, mode: PollMode) -> CycleOptions {
    CycleOptions {
        mode,
        enforce_threshold: config.enforce_threshold,
    }
}

/// Run one poll cycle for a scope.
///
/// This is the canonical poll entrypoint for both `tagwatch poll` and the
/// daemon scheduler.
pub fn run(
    home: &Path,
    scope: PollScope,
    mode: PollMode,
    cancel: &CancelFlag,
) -> Result<CycleReport, PollError> {
    let config = config::load_at(home)?;
    let monitor = build_monitor(home, &config);
    let mut registry = FileAccountRegistry::new(home);
    let migration = MarkerFileMigration::at(home);
    run_cycle(
        &monitor,
        &mut registry,
        Some(&migration),
        &scope,
        options_for(&config, mode),
        cancel,
    )
}
