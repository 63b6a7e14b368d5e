//! Delivery of queued operations to the remote ledger.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

use super::operation::{HttpMethod, QueuedOperation};
use crate::config::{Config, LedgerConfig};
use crate::error::SyncError;

/// Header carrying the ledger tenant.
pub const TENANT_HEADER: &str = "Fineract-Platform-TenantId";

/// Longest response body kept in a rejection message.
const MAX_ERROR_BODY: usize = 1024;

/// Why a single delivery attempt failed. Every variant counts as a failed
/// attempt for retry purposes.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Connection could not be made or was dropped.
    #[error("Network error: {0}")]
    Network(String),

    /// The attempt exceeded the per-request timeout.
    #[error("Request timed out")]
    Timeout,

    /// The remote system answered with a non-success status.
    #[error("Rejected by remote ({status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// The endpoint could not be turned into a request.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl DeliveryError {
    /// HTTP status if the remote rejected the request.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::InvalidEndpoint(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Delivery port. One call is one attempt.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Issue the request described by `operation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the remote does not accept it.
    fn deliver(&self, operation: &QueuedOperation) -> Result<(), DeliveryError>;
}

/// Blocking HTTP delivery with JSON bodies.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    tenant: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl HttpTransport {
    /// Create a transport for the given ledger with a per-attempt timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(ledger: &LedgerConfig, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: ledger.base_url.trim_end_matches('/').to_string(),
            tenant: ledger.tenant.clone(),
            username: ledger.username.clone(),
            password: ledger.password.clone(),
        })
    }

    /// Create a transport from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        Self::new(&config.ledger, config.sync.request_timeout())
    }

    /// Resolve an endpoint against the base URL. Absolute URLs pass through.
    #[must_use]
    pub fn resolve(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }
}

impl Transport for HttpTransport {
    fn deliver(&self, operation: &QueuedOperation) -> Result<(), DeliveryError> {
        if operation.endpoint.trim().is_empty() {
            return Err(DeliveryError::InvalidEndpoint("empty endpoint".to_string()));
        }

        let url = self.resolve(&operation.endpoint);
        let mut req = match operation.method {
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
        };

        req = req.header(CONTENT_TYPE, "application/json");

        if let Some(tenant) = &self.tenant {
            req = req.header(TENANT_HEADER, tenant);
        }
        if let Some(username) = &self.username {
            req = req.basic_auth(username, self.password.as_deref());
        }

        let resp = req.json(&operation.body).send()?;
        let status = resp.status();

        if status.is_success() {
            return Ok(());
        }

        let body = resp
            .text()
            .unwrap_or_default()
            .chars()
            .take(MAX_ERROR_BODY)
            .collect::<String>();

        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
