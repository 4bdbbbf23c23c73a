//! Daemon runtime: interval scheduler + poll processor + socket server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{DaemonClient, DaemonRequest, DaemonResponse};
pub use runtime::{run, start_blocking, AccountCache, CycleSummary};
