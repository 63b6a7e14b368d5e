//! Storage backends for the sync queue.
//!
//! The queue sees its store as a single ordered collection it can load and
//! save. [`SqliteStore`] persists to disk; [`MemoryStore`] keeps records in
//! process.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::operation::{HttpMethod, OperationId, OperationKind, OperationStatus, QueuedOperation};
use crate::config::DEFAULT_NAMESPACE;
use crate::error::SyncError;
use crate::storage::Database;

/// Persistence port for the queue's record collection.
#[cfg_attr(test, mockall::automock)]
pub trait QueueStore: Send {
    /// Load every record in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load(&self) -> Result<Vec<QueuedOperation>, SyncError>;

    /// Replace the stored collection with `operations`, keeping slice order.
    ///
    /// Must be durable when it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn save(&mut self, operations: &[QueuedOperation]) -> Result<(), SyncError>;

    /// Count records with the given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn count_by_status(&self, status: OperationStatus) -> Result<usize, SyncError> {
        Ok(self
            .load()?
            .iter()
            .filter(|op| op.status == status)
            .count())
    }
}

/// In-process store. Contents are lost when it is dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    operations: Vec<QueuedOperation>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Create a store pre-filled with records.
    #[must_use]
    pub const fn with_operations(operations: Vec<QueuedOperation>) -> Self {
        Self { operations }
    }
}

impl QueueStore for MemoryStore {
    fn load(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        Ok(self.operations.clone())
    }

    fn save(&mut self, operations: &[QueuedOperation]) -> Result<(), SyncError> {
        self.operations = operations.to_vec();
        Ok(())
    }

    fn count_by_status(&self, status: OperationStatus) -> Result<usize, SyncError> {
        Ok(self
            .operations
            .iter()
            .filter(|op| op.status == status)
            .count())
    }
}

/// SQLite-backed store. Records live in the `sync_queue` table under a fixed
/// namespace key.
pub struct SqliteStore {
    db: Database,
    namespace: String,
}

impl SqliteStore {
    /// Open the store in the default database (`~/.vsla/vsla.db`).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open() -> Result<Self, SyncError> {
        Ok(Self::new(Database::open()?))
    }

    /// Open the store in the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_at(path: &Path) -> Result<Self, SyncError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    /// Create a store on an existing database under the default namespace.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self::with_namespace(db, DEFAULT_NAMESPACE)
    }

    /// Create a store on an existing database under a custom namespace.
    #[must_use]
    pub fn with_namespace(db: Database, namespace: impl Into<String>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }

    /// Namespace this store reads and writes.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl QueueStore for SqliteStore {
    fn load(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        let conn = self.db.connection();

        let mut stmt = conn
            .prepare(
                r"SELECT id, kind, endpoint, method, body, created_at, retry_count,
                         last_attempt, last_error, status
                  FROM sync_queue
                  WHERE namespace = ?1
                  ORDER BY seq ASC",
            )
            .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([&self.namespace], |row| {
                Ok(StoredRow {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    endpoint: row.get(2)?,
                    method: row.get(3)?,
                    body: row.get(4)?,
                    created_at: row.get(5)?,
                    retry_count: row.get(6)?,
                    last_attempt: row.get(7)?,
                    last_error: row.get(8)?,
                    status: row.get(9)?,
                })
            })
            .map_err(|e| SyncError::Database(format!("Failed to query sync queue: {e}")))?;

        let mut operations = Vec::new();
        for row in rows {
            let row = row.map_err(|e| SyncError::Database(e.to_string()))?;
            operations.push(row.into_operation()?);
        }

        Ok(operations)
    }

    fn save(&mut self, operations: &[QueuedOperation]) -> Result<(), SyncError> {
        let tx = self
            .db
            .connection_mut()
            .transaction()
            .map_err(|e| SyncError::Database(format!("Failed to begin transaction: {e}")))?;

        tx.execute(
            "DELETE FROM sync_queue WHERE namespace = ?1",
            [&self.namespace],
        )
        .map_err(|e| SyncError::Database(format!("Failed to clear sync queue: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    r"INSERT INTO sync_queue (namespace, id, kind, endpoint, method, body,
                                              created_at, retry_count, last_attempt,
                                              last_error, status)
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )
                .map_err(|e| SyncError::Database(format!("Failed to prepare insert: {e}")))?;

            for op in operations {
                stmt.execute(params![
                    self.namespace,
                    op.id.to_string(),
                    op.kind.as_str(),
                    op.endpoint,
                    op.method.as_str(),
                    op.body.to_string(),
                    op.created_at.to_rfc3339(),
                    op.retry_count,
                    op.last_attempt.map(|t| t.to_rfc3339()),
                    op.last_error,
                    op.status.as_str(),
                ])
                .map_err(|e| {
                    SyncError::Database(format!("Failed to write operation {}: {e}", op.id))
                })?;
            }
        }

        tx.commit()
            .map_err(|e| SyncError::Database(format!("Failed to commit sync queue: {e}")))
    }

    fn count_by_status(&self, status: OperationStatus) -> Result<usize, SyncError> {
        let count: i64 = self
            .db
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE namespace = ?1 AND status = ?2",
                params![self.namespace, status.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to count {status}: {e}")))?;

        usize::try_from(count).map_err(|e| SyncError::Database(e.to_string()))
    }
}

/// Raw column values of one `sync_queue` row.
struct StoredRow {
    id: String,
    kind: String,
    endpoint: String,
    method: String,
    body: String,
    created_at: String,
    retry_count: u32,
    last_attempt: Option<String>,
    last_error: Option<String>,
    status: String,
}

impl StoredRow {
    fn into_operation(self) -> Result<QueuedOperation, SyncError> {
        let corrupt = |field: &str, e: &dyn std::fmt::Display| {
            SyncError::Serialization(format!(
                "Corrupt {field} in queued operation {}: {e}",
                self.id
            ))
        };

        let id: OperationId = self
            .id
            .parse()
            .map_err(|e: uuid::Error| corrupt("id", &e))?;
        let kind: OperationKind = self
            .kind
            .parse()
            .map_err(|e: String| corrupt("kind", &e))?;
        let method: HttpMethod = self
            .method
            .parse()
            .map_err(|e: String| corrupt("method", &e))?;
        let status: OperationStatus = self
            .status
            .parse()
            .map_err(|e: String| corrupt("status", &e))?;
        let body: serde_json::Value = serde_json::from_str(&self.body)
            .map_err(|e: serde_json::Error| corrupt("body", &e))?;
        let created_at = parse_timestamp(&self.created_at)
            .map_err(|e: chrono::ParseError| corrupt("created_at", &e))?;
        let last_attempt = self
            .last_attempt
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(|e: chrono::ParseError| corrupt("last_attempt", &e))?;

        Ok(QueuedOperation {
            id,
            kind,
            endpoint: self.endpoint,
            method,
            body,
            created_at,
            retry_count: self.retry_count,
            status,
            last_attempt,
            last_error: self.last_error,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}
