//! tagwatch core library: domain types, account registry, global config, errors.
//!
//! - [`types`]: account and image newtypes and domain structs
//! - [`error`]: [`RegistryError`], [`ConfigError`]
//! - [`registry`]: per-account YAML load / save / list
//! - [`config`]: `~/.tagwatch/config.yaml`

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::{Config, SinkConfig};
pub use error::{ConfigError, RegistryError};
pub use types::{Account, AccountName, AccountSnapshot, ObservedImage};
