//! Configuration settings for vsla-sync.
//!
//! Settings are loaded from `~/.vsla/config.yaml` and can be overridden from
//! the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Paths;
use crate::error::SyncError;

/// Default storage namespace for the queue.
pub const DEFAULT_NAMESPACE: &str = "vsla_sync_queue";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Remote ledger connection settings.
    pub ledger: LedgerConfig,
    /// Queue and delivery settings.
    pub sync: SyncConfig,
}

/// Remote ledger connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL that relative endpoints are resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Value of the `Fineract-Platform-TenantId` header.
    #[serde(default = "default_tenant")]
    pub tenant: Option<String>,
    /// Basic auth user name.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,
}

/// Queue and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Per-attempt delivery timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Interval between periodic drains, and the UI badge poll interval.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Storage namespace the queue records live under.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

// Default value functions for serde
fn default_base_url() -> String {
    "https://demo.fineract.dev/fineract-provider/api/v1".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_tenant() -> Option<String> {
    Some("default".to_string())
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_poll_interval() -> u64 {
    1
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            tenant: default_tenant(),
            username: None,
            password: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            poll_interval_secs: default_poll_interval(),
            namespace: default_namespace(),
        }
    }
}

impl SyncConfig {
    /// Per-attempt delivery timeout. Never zero.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Interval between periodic drains. Never zero.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from the default path, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or an
    /// override has an invalid value.
    pub fn load() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        let mut config = Self::load_from_path(&paths.config_file)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), SyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| SyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`Config::load`]).
    ///
    /// Recognised keys: `VSLA_LEDGER_URL`, `VSLA_LEDGER_TENANT`,
    /// `VSLA_LEDGER_USERNAME`, `VSLA_LEDGER_PASSWORD`,
    /// `VSLA_SYNC_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns an error if `VSLA_SYNC_TIMEOUT_SECS` is not a number.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VSLA_LEDGER_URL") {
            self.ledger.base_url = url;
        }
        if let Some(tenant) = lookup("VSLA_LEDGER_TENANT") {
            self.ledger.tenant = Some(tenant).filter(|t| !t.is_empty());
        }
        if let Some(username) = lookup("VSLA_LEDGER_USERNAME") {
            self.ledger.username = Some(username);
        }
        if let Some(password) = lookup("VSLA_LEDGER_PASSWORD") {
            self.ledger.password = Some(password);
        }
        if let Some(timeout) = lookup("VSLA_SYNC_TIMEOUT_SECS") {
            self.sync.request_timeout_secs = timeout.trim().parse().map_err(|e| {
                SyncError::Config(format!("Invalid VSLA_SYNC_TIMEOUT_SECS '{timeout}': {e}"))
            })?;
        }

        Ok(())
    }
}
