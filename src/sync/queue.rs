//! Sync queue management.
//!
//! [`SyncQueue`] owns the durable collection of [`QueuedOperation`]s. Every
//! state change is a single load-modify-save under the store lock, so each
//! transition is persisted before the call that made it returns. The lock is
//! never held while a delivery attempt is in flight.
//!
//! An on-disk queue is owned by the handle that opened it: the database file
//! stays locked until that handle is dropped. Share one [`SyncQueue`] through
//! an `Arc` rather than opening the same file twice.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::executor::{SyncExecutor, SyncResult};
use super::operation::{HttpMethod, OperationId, OperationKind, OperationStatus, QueuedOperation};
use super::store::{QueueStore, SqliteStore};
use super::transport::Transport;
use crate::config::Config;
use crate::error::SyncError;
use crate::storage::Database;

/// Durable outbox of deferred ledger operations.
pub struct SyncQueue {
    store: Mutex<Box<dyn QueueStore>>,
    draining: AtomicBool,
}

impl SyncQueue {
    /// Open the queue on the default on-disk store (`~/.vsla/vsla.db`).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or recovered.
    pub fn open() -> Result<Self, SyncError> {
        Self::with_store(SqliteStore::open()?)
    }

    /// Open the queue on the default database under the configured namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or recovered.
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        Self::with_store(SqliteStore::with_namespace(
            Database::open()?,
            config.sync.namespace.as_str(),
        ))
    }

    /// Open the queue on the SQLite database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or recovered, or is
    /// already held by another open queue.
    pub fn open_at(path: &Path) -> Result<Self, SyncError> {
        Self::with_store(SqliteStore::open_at(path)?)
    }

    /// Create a queue over an injected store.
    ///
    /// Operations left in [`OperationStatus::Processing`] by an interrupted
    /// sweep are reset to pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn with_store(store: impl QueueStore + 'static) -> Result<Self, SyncError> {
        let queue = Self {
            store: Mutex::new(Box::new(store)),
            draining: AtomicBool::new(false),
        };
        queue.recover_interrupted()?;
        Ok(queue)
    }

    /// Add an operation to the end of the queue.
    ///
    /// The record is persisted before this returns. Endpoint and body are not
    /// validated here; a bad request surfaces as a delivery failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be saved. The enqueue did not
    /// happen in that case.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        endpoint: impl Into<String>,
        method: HttpMethod,
        body: serde_json::Value,
    ) -> Result<OperationId, SyncError> {
        let operation = QueuedOperation::new(kind, endpoint, method, body);
        let id = operation.id;

        let mut store = self.lock()?;
        let mut operations = store.load()?;
        operations.push(operation);
        store.save(&operations)?;

        tracing::debug!("Queued {kind} operation {id} ({} in queue)", operations.len());
        Ok(id)
    }

    /// Number of operations waiting for the next sweep.
    ///
    /// Excludes operations being delivered or parked as failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn pending_count(&self) -> Result<usize, SyncError> {
        self.lock()?.count_by_status(OperationStatus::Pending)
    }

    /// Attempt delivery of every pending operation.
    ///
    /// Only one sweep runs at a time. A call made while another sweep is in
    /// progress returns immediately with [`SyncResult::already_running`] set and touches
    /// nothing. Otherwise any operation left in processing by an earlier sweep
    /// that hit a storage error is reset to pending first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails; individual delivery failures
    /// are recorded on their operations.
    pub fn drain(&self, transport: &dyn Transport) -> Result<SyncResult, SyncError> {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!("Sync already in progress, skipping drain");
            return Ok(SyncResult::busy());
        };

        self.recover_interrupted()?;
        SyncExecutor::new(self, transport).execute_all()
    }

    /// Check if a sweep is currently running.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn stats(&self) -> Result<QueueStats, SyncError> {
        let operations = self.operations()?;
        let count = |status: OperationStatus| operations.iter().filter(|op| op.status == status).count();

        Ok(QueueStats {
            pending: count(OperationStatus::Pending),
            processing: count(OperationStatus::Processing),
            failed: count(OperationStatus::Failed),
            oldest_pending: operations
                .iter()
                .filter(|op| op.is_pending())
                .map(|op| op.created_at)
                .min(),
        })
    }

    /// Every stored operation in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn operations(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        self.lock()?.load()
    }

    /// Operations with a given status, in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn by_status(&self, status: OperationStatus) -> Result<Vec<QueuedOperation>, SyncError> {
        let mut operations = self.operations()?;
        operations.retain(|op| op.status == status);
        Ok(operations)
    }

    /// Get a specific operation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get(&self, id: OperationId) -> Result<Option<QueuedOperation>, SyncError> {
        Ok(self.operations()?.into_iter().find(|op| op.id == id))
    }

    /// Remove an operation regardless of its status.
    ///
    /// Returns false if no such operation exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn remove(&self, id: OperationId) -> Result<bool, SyncError> {
        let mut store = self.lock()?;
        let mut operations = store.load()?;
        let before = operations.len();
        operations.retain(|op| op.id != id);

        if operations.len() == before {
            return Ok(false);
        }

        store.save(&operations)?;
        Ok(true)
    }

    /// Move a failed operation back to pending for one more attempt.
    ///
    /// The retry count is kept, so a further failure parks it again.
    /// Returns false if the operation does not exist or has not failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn requeue_failed(&self, id: OperationId) -> Result<bool, SyncError> {
        let requeued = self.update(id, |op| {
            if op.status == OperationStatus::Failed {
                op.status = OperationStatus::Pending;
                true
            } else {
                false
            }
        })?;

        if requeued == Some(true) {
            tracing::info!("Requeued failed operation {id}");
            return Ok(true);
        }
        Ok(false)
    }

    /// Move every failed operation back to pending. Returns how many moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn requeue_all_failed(&self) -> Result<usize, SyncError> {
        let moved = self.reset_status(OperationStatus::Failed)?;
        if moved > 0 {
            tracing::info!("Requeued {moved} failed operations");
        }
        Ok(moved)
    }

    /// Reset operations stuck in processing back to pending.
    ///
    /// Their last delivery outcome is unknown, so they will be sent again
    /// (at-least-once). Runs automatically when a queue is created and at the
    /// start of every sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn recover_interrupted(&self) -> Result<usize, SyncError> {
        let recovered = self.reset_status(OperationStatus::Processing)?;
        if recovered > 0 {
            tracing::warn!(
                "Recovered {recovered} operations interrupted mid-delivery; they will be resent"
            );
        }
        Ok(recovered)
    }

    /// Ids of the pending operations, in FIFO order.
    pub(crate) fn pending_ids(&self) -> Result<Vec<OperationId>, SyncError> {
        Ok(self
            .lock()?
            .load()?
            .into_iter()
            .filter(QueuedOperation::is_pending)
            .map(|op| op.id)
            .collect())
    }

    /// Claim a pending operation for delivery, persisting the processing state.
    ///
    /// Returns `None` if the operation is gone or no longer pending.
    pub(crate) fn begin_delivery(
        &self,
        id: OperationId,
    ) -> Result<Option<QueuedOperation>, SyncError> {
        let claimed = self.update(id, |op| {
            if op.is_pending() {
                op.begin_attempt();
                Some(op.clone())
            } else {
                None
            }
        })?;
        Ok(claimed.flatten())
    }

    /// Remove a delivered operation.
    pub(crate) fn complete_delivery(&self, id: OperationId) -> Result<(), SyncError> {
        self.remove(id)?;
        Ok(())
    }

    /// Record a failed attempt and apply the retry ceiling.
    ///
    /// Returns the updated operation, or `None` if it was removed meanwhile.
    pub(crate) fn fail_delivery(
        &self,
        id: OperationId,
        error: &str,
    ) -> Result<Option<QueuedOperation>, SyncError> {
        self.update(id, |op| {
            op.record_failure(error);
            op.clone()
        })
    }

    fn reset_status(&self, from: OperationStatus) -> Result<usize, SyncError> {
        let mut store = self.lock()?;
        let mut operations = store.load()?;

        let mut changed = 0;
        for op in operations.iter_mut().filter(|op| op.status == from) {
            op.status = OperationStatus::Pending;
            changed += 1;
        }

        if changed > 0 {
            store.save(&operations)?;
        }
        Ok(changed)
    }

    /// Apply `f` to one operation and persist the result.
    fn update<T, F>(&self, id: OperationId, f: F) -> Result<Option<T>, SyncError>
    where
        F: FnOnce(&mut QueuedOperation) -> T,
    {
        let mut store = self.lock()?;
        let mut operations = store.load()?;

        let Some(op) = operations.iter_mut().find(|op| op.id == id) else {
            return Ok(None);
        };
        let result = f(op);

        store.save(&operations)?;
        Ok(Some(result))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn QueueStore>>, SyncError> {
        self.store
            .lock()
            .map_err(|_| SyncError::Database("Sync queue store lock poisoned".to_string()))
    }
}

/// Queue statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations waiting for the next sweep
    pub pending: usize,
    /// Operations with a delivery attempt in flight
    pub processing: usize,
    /// Operations parked after reaching the retry ceiling
    pub failed: usize,
    /// Oldest pending operation timestamp
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Holds the single-flight flag for the duration of a sweep.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
