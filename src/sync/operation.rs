//! Records held by the sync queue.
//!
//! A [`QueuedOperation`] is one deferred request to the remote ledger. The
//! queue never looks inside `body`; the enqueueing collaborator owns its shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Failed delivery attempts after which an operation is parked as
/// [`OperationStatus::Failed`].
pub const MAX_RETRIES: u32 = 3;

/// Unique identifier of a queued operation.
///
/// UUIDv7: time-ordered, so ids minted after a restart never collide with
/// stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Mint a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Business operation a record stands for. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Meeting attendance register
    Attendance,
    /// Savings deposit
    Deposit,
    /// Loan repayment
    Repayment,
}

impl OperationKind {
    /// Stored tag for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Attendance => "ATTENDANCE",
            Self::Deposit => "DEPOSIT",
            Self::Repayment => "REPAYMENT",
        }
    }

    /// Human readable name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Attendance => "Attendance",
            Self::Deposit => "Deposit",
            Self::Repayment => "Loan Repayment",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATTENDANCE" => Ok(Self::Attendance),
            "DEPOSIT" => Ok(Self::Deposit),
            "REPAYMENT" => Ok(Self::Repayment),
            other => Err(format!("Unknown operation kind: {other}")),
        }
    }
}

/// HTTP verb used to deliver an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `POST`
    Post,
    /// `PUT`
    Put,
}

impl HttpMethod {
    /// Wire name of the verb.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            _ => Err(format!("Unsupported HTTP method: {s}")),
        }
    }
}

/// Status of a queued operation.
///
/// There is no succeeded state: a delivered operation is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    /// Waiting for the next sweep
    Pending,
    /// Delivery attempt in flight
    Processing,
    /// Retry ceiling reached; never retried automatically
    Failed,
}

impl OperationStatus {
    /// Check if this status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Stored name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("Unknown operation status: {other}")),
        }
    }
}

/// One deferred network request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// Unique ID, immutable once assigned
    pub id: OperationId,
    /// Business operation tag
    pub kind: OperationKind,
    /// Absolute URL or path relative to the ledger base URL
    pub endpoint: String,
    /// HTTP verb
    pub method: HttpMethod,
    /// Payload transmitted verbatim
    pub body: serde_json::Value,
    /// When the operation was queued
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far
    pub retry_count: u32,
    /// Current status
    pub status: OperationStatus,
    /// Last delivery attempt timestamp
    pub last_attempt: Option<DateTime<Utc>>,
    /// Last delivery error message
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Create a new pending operation with a fresh id.
    #[must_use]
    pub fn new(
        kind: OperationKind,
        endpoint: impl Into<String>,
        method: HttpMethod,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            endpoint: endpoint.into(),
            method,
            body,
            created_at: Utc::now(),
            retry_count: 0,
            status: OperationStatus::Pending,
            last_attempt: None,
            last_error: None,
        }
    }

    /// Check if the next sweep will pick this operation up.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OperationStatus::Pending
    }

    /// Mark a delivery attempt as started.
    pub fn begin_attempt(&mut self) {
        self.status = OperationStatus::Processing;
        self.last_attempt = Some(Utc::now());
    }

    /// Record a failed delivery attempt and apply the retry ceiling.
    ///
    /// Returns the resulting status.
    pub fn record_failure(&mut self, error: impl Into<String>) -> OperationStatus {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.status = if self.retry_count >= MAX_RETRIES {
            OperationStatus::Failed
        } else {
            OperationStatus::Pending
        };
        self.status
    }
}
