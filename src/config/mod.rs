//! Configuration management for vsla-sync.
//!
//! This module handles loading configuration from `~/.vsla/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{Config, LedgerConfig, SyncConfig, DEFAULT_NAMESPACE};
