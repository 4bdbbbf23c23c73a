//! # tagwatch-poller
//!
//! Reconciliation engine: decides which image tags are new or changed since
//! the last poll, commits them to the cache and notifies downstream.
//!
//! Call [`pipeline::run`] to poll with the on-disk collaborators under
//! `~/.tagwatch/`, or drive [`cycle::run_cycle`] with your own
//! [`PollingMonitor`], [`AccountRegistry`] and [`MigrationStatus`].

pub mod accounts;
pub mod cache;
pub mod classifier;
pub mod commit;
pub mod cycle;
pub mod delta;
pub mod error;
pub mod key;
pub mod migration;
pub mod monitor;
pub mod notify;
pub mod pipeline;
pub mod sink;
pub mod sizer;
pub mod source;

pub use accounts::{AccountRegistry, FileAccountRegistry, StaticAccountRegistry};
pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore};
pub use classifier::Change;
pub use commit::{CommitReport, NotifyCounters};
pub use cycle::{
    run_cycle, AccountOutcome, AccountPollResult, CancelFlag, CycleOptions, CycleOutcome,
    CycleReport, CycleTotals, PollMode, PollScope,
};
pub use delta::{DeltaStats, ImageDelta, PollingDelta};
pub use error::{CacheError, PollError, SinkError, SourceError};
pub use key::{ImageKey, KeyCodec};
pub use migration::{MarkerFileMigration, MigrationStatus};
pub use monitor::{ImageTagMonitor, PollingMonitor};
pub use notify::ImageEvent;
pub use sink::NotificationSink;
pub use source::{RegistrySource, RemoteSource};
