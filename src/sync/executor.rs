//! Sync executor for delivering queued operations.
//!
//! One sweep snapshots the pending operations and delivers them one at a
//! time in FIFO order. Each operation is committed as processing before its
//! request goes out; delivered operations are removed and failed ones are
//! requeued or parked according to the retry ceiling.
//!
//! Sweeps only start through [`SyncQueue::drain`], which holds the
//! single-flight guard; the executor itself is not part of the public API.
//!
//! ```compile_fail
//! use vsla_sync::sync::executor::SyncExecutor;
//! ```

use super::operation::{OperationId, OperationKind, OperationStatus};
use super::queue::SyncQueue;
use super::transport::Transport;
use crate::error::SyncError;

/// Result of one delivery attempt.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Operation ID
    pub id: OperationId,
    /// Operation kind
    pub kind: OperationKind,
    /// Whether the remote accepted it
    pub success: bool,
    /// Failed attempts after this one
    pub retry_count: u32,
    /// Status after the attempt, `None` once removed
    pub status: Option<OperationStatus>,
    /// Error message if failed
    pub error: Option<String>,
}

/// Result of a sweep.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Delivered and removed
    pub succeeded: usize,
    /// Failed and requeued for the next sweep
    pub retried: usize,
    /// Failed and parked at the retry ceiling
    pub failed: usize,
    /// Snapshot entries that were gone or no longer pending when reached
    pub skipped: usize,
    /// Another sweep was running; nothing was done
    pub already_running: bool,
    /// Individual results
    pub results: Vec<ExecutionResult>,
}

impl SyncResult {
    /// Create an empty result.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            succeeded: 0,
            retried: 0,
            failed: 0,
            skipped: 0,
            already_running: false,
            results: Vec::new(),
        }
    }

    /// Result of a drain call that found a sweep already running.
    #[must_use]
    pub const fn busy() -> Self {
        let mut result = Self::empty();
        result.already_running = true;
        result
    }

    /// Add a result.
    pub fn add(&mut self, result: ExecutionResult) {
        if result.success {
            self.succeeded += 1;
        } else if result.status == Some(OperationStatus::Failed) {
            self.failed += 1;
        } else {
            self.retried += 1;
        }
        self.results.push(result);
    }

    /// Check if every attempted operation was delivered.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.retried == 0 && self.failed == 0
    }

    /// Get total delivery attempts made.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.retried + self.failed
    }
}

/// Runs one sweep over a queue.
pub(crate) struct SyncExecutor<'a> {
    queue: &'a SyncQueue,
    transport: &'a dyn Transport,
}

impl<'a> SyncExecutor<'a> {
    /// Create a new executor. The caller must hold the drain guard.
    #[must_use]
    pub fn new(queue: &'a SyncQueue, transport: &'a dyn Transport) -> Self {
        Self { queue, transport }
    }

    /// Deliver every operation pending at the time of the call.
    ///
    /// Operations enqueued while the sweep runs wait for the next one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails. Operations already handled keep
    /// their persisted state.
    pub fn execute_all(&self) -> Result<SyncResult, SyncError> {
        let snapshot = self.queue.pending_ids()?;
        let mut result = SyncResult::empty();

        if snapshot.is_empty() {
            return Ok(result);
        }

        tracing::info!("Syncing {} pending operations", snapshot.len());

        for id in snapshot {
            match self.execute_one(id)? {
                Some(op_result) => result.add(op_result),
                None => result.skipped += 1,
            }
        }

        tracing::info!(
            "Sync completed: {} delivered, {} requeued, {} failed, {} skipped",
            result.succeeded,
            result.retried,
            result.failed,
            result.skipped
        );

        Ok(result)
    }

    /// Make one delivery attempt for a pending operation.
    ///
    /// Returns `None` if the operation is gone or no longer pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn execute_one(&self, id: OperationId) -> Result<Option<ExecutionResult>, SyncError> {
        let Some(operation) = self.queue.begin_delivery(id)? else {
            tracing::debug!("Skipping operation {id}: no longer pending");
            return Ok(None);
        };

        match self.transport.deliver(&operation) {
            Ok(()) => {
                self.queue.complete_delivery(id)?;
                tracing::debug!("Delivered {} operation {id}", operation.kind);

                Ok(Some(ExecutionResult {
                    id,
                    kind: operation.kind,
                    success: true,
                    retry_count: operation.retry_count,
                    status: None,
                    error: None,
                }))
            },
            Err(e) => {
                let error_msg = e.to_string();
                let updated = self.queue.fail_delivery(id, &error_msg)?;
                let (retry_count, status) = updated.map_or(
                    (operation.retry_count.saturating_add(1), None),
                    |op| (op.retry_count, Some(op.status)),
                );

                if status == Some(OperationStatus::Failed) {
                    tracing::error!(
                        "{} operation {id} failed after {retry_count} attempts: {error_msg}",
                        operation.kind
                    );
                } else {
                    tracing::warn!(
                        "{} operation {id} attempt {retry_count} failed: {error_msg}",
                        operation.kind
                    );
                }

                Ok(Some(ExecutionResult {
                    id,
                    kind: operation.kind,
                    success: false,
                    retry_count,
                    status,
                    error: Some(error_msg),
                }))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use mockall::Sequence;
    use serde_json::json;

    use super::*;
    use crate::sync::operation::{HttpMethod, QueuedOperation, MAX_RETRIES};
    use crate::sync::store::{MemoryStore, MockQueueStore};
    use crate::sync::transport::{DeliveryError, MockTransport};

    const DEPOSIT_ENDPOINT: &str = "/savingsaccounts/101/transactions?command=deposit";

    fn create_test_queue() -> Arc<SyncQueue> {
        Arc::new(SyncQueue::with_store(MemoryStore::new()).unwrap())
    }

    fn enqueue(queue: &SyncQueue, endpoint: &str) -> OperationId {
        queue
            .enqueue(
                OperationKind::Deposit,
                endpoint,
                HttpMethod::Post,
                json!({ "transactionAmount": 5000, "transactionDate": "2024-01-15" }),
            )
            .unwrap()
    }

    fn server_error() -> DeliveryError {
        DeliveryError::Rejected {
            status: 500,
            body: "Internal Server Error".to_string(),
        }
    }

    /// Transport for sweeps that must never reach the network.
    struct Unreachable;

    impl Transport for Unreachable {
        fn deliver(&self, _operation: &QueuedOperation) -> Result<(), DeliveryError> {
            panic!("unexpected delivery attempt");
        }
    }

    #[test]
    fn test_sync_result() {
        let mut result = SyncResult::empty();
        let id = OperationId::new();

        result.add(ExecutionResult {
            id,
            kind: OperationKind::Deposit,
            success: true,
            retry_count: 0,
            status: None,
            error: None,
        });
        result.add(ExecutionResult {
            id,
            kind: OperationKind::Repayment,
            success: false,
            retry_count: 1,
            status: Some(OperationStatus::Pending),
            error: Some("Request timed out".to_string()),
        });
        result.add(ExecutionResult {
            id,
            kind: OperationKind::Attendance,
            success: false,
            retry_count: 3,
            status: Some(OperationStatus::Failed),
            error: Some("Rejected by remote (500): boom".to_string()),
        });

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.retried, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.total(), 3);
        assert!(!result.all_succeeded());
        assert!(!result.already_running);
        assert!(SyncResult::busy().already_running);
    }

    #[test]
    fn test_drain_empty_queue() {
        let queue = create_test_queue();

        let result = queue.drain(&Unreachable).unwrap();

        assert_eq!(result.total(), 0);
        assert!(result.all_succeeded());
    }

    #[test]
    fn test_drain_delivers_in_fifo_order() {
        let queue = create_test_queue();
        let first = enqueue(&queue, "/savingsaccounts/101/transactions?command=deposit");
        let second = enqueue(&queue, "/loans/201/transactions?command=repayment");

        let mut seq = Sequence::new();
        let mut transport = MockTransport::new();
        transport
            .expect_deliver()
            .withf(move |op| op.id == first)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        transport
            .expect_deliver()
            .withf(move |op| op.id == second)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let result = queue.drain(&transport).unwrap();

        assert_eq!(result.succeeded, 2);
        assert_eq!(result.results[0].id, first);
        assert_eq!(result.results[1].id, second);
        assert!(queue.operations().unwrap().is_empty());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_operation_is_processing_during_delivery() {
        let queue = create_test_queue();
        let id = enqueue(&queue, DEPOSIT_ENDPOINT);

        let observed = Arc::clone(&queue);
        let mut transport = MockTransport::new();
        transport.expect_deliver().times(1).returning(move |op| {
            let stored = observed.get(op.id).unwrap().unwrap();
            assert_eq!(stored.status, OperationStatus::Processing);
            assert!(stored.last_attempt.is_some());
            assert_eq!(observed.pending_count().unwrap(), 0);
            Err(DeliveryError::Timeout)
        });

        queue.drain(&transport).unwrap();

        let op = queue.get(id).unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.last_error.as_deref(), Some("Request timed out"));
    }

    #[test]
    fn test_drain_recovers_abandoned_claim() {
        let queue = create_test_queue();
        let id = enqueue(&queue, DEPOSIT_ENDPOINT);

        // A sweep that failed on storage after claiming leaves this behind
        queue.begin_delivery(id).unwrap().unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);

        let mut transport = MockTransport::new();
        transport
            .expect_deliver()
            .withf(move |op| op.id == id)
            .times(1)
            .returning(|_| Ok(()));

        let result = queue.drain(&transport).unwrap();

        assert_eq!(result.succeeded, 1);
        assert!(queue.operations().unwrap().is_empty());
    }

    #[test]
    fn test_retry_ceiling_parks_operation() {
        let queue = create_test_queue();
        let id = enqueue(&queue, DEPOSIT_ENDPOINT);

        let mut transport = MockTransport::new();
        transport
            .expect_deliver()
            .times(usize::try_from(MAX_RETRIES).unwrap())
            .returning(|_| Err(DeliveryError::Network("network unreachable".to_string())));

        for attempt in 1..MAX_RETRIES {
            let result = queue.drain(&transport).unwrap();
            assert_eq!(result.retried, 1);

            let op = queue.get(id).unwrap().unwrap();
            assert_eq!(op.status, OperationStatus::Pending);
            assert_eq!(op.retry_count, attempt);
        }

        let result = queue.drain(&transport).unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.results[0].status, Some(OperationStatus::Failed));

        // Parked operations are left alone by later sweeps
        for _ in 0..2 {
            let result = queue.drain(&transport).unwrap();
            assert_eq!(result.total(), 0);
        }

        let op = queue.get(id).unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, MAX_RETRIES);
        assert!(op.last_error.unwrap().contains("network unreachable"));
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_deposit_succeeds_on_third_attempt() {
        let queue = create_test_queue();
        let id = queue
            .enqueue(
                OperationKind::Deposit,
                DEPOSIT_ENDPOINT,
                HttpMethod::Post,
                json!({ "transactionAmount": 5000, "transactionDate": "2024-01-15" }),
            )
            .unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut transport = MockTransport::new();
        transport.expect_deliver().times(3).returning(move |op| {
            assert_eq!(op.endpoint, DEPOSIT_ENDPOINT);
            assert_eq!(op.method, HttpMethod::Post);
            assert_eq!(op.body["transactionAmount"], 5000);
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(server_error())
            } else {
                Ok(())
            }
        });

        queue.drain(&transport).unwrap();
        let op = queue.get(id).unwrap().unwrap();
        assert_eq!((op.retry_count, op.status), (1, OperationStatus::Pending));
        assert_eq!(queue.pending_count().unwrap(), 1);

        queue.drain(&transport).unwrap();
        let op = queue.get(id).unwrap().unwrap();
        assert_eq!((op.retry_count, op.status), (2, OperationStatus::Pending));

        let result = queue.drain(&transport).unwrap();
        assert_eq!(result.succeeded, 1);
        assert!(queue.get(id).unwrap().is_none());
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_one_failure_does_not_block_others() {
        let queue = create_test_queue();
        let failing = enqueue(&queue, "/savingsaccounts/999/transactions?command=deposit");
        let ok = enqueue(&queue, DEPOSIT_ENDPOINT);

        let mut transport = MockTransport::new();
        transport
            .expect_deliver()
            .times(2)
            .returning(move |op| if op.id == failing { Err(server_error()) } else { Ok(()) });

        let result = queue.drain(&transport).unwrap();

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.retried, 1);
        assert!(queue.get(ok).unwrap().is_none());
        assert_eq!(queue.get(failing).unwrap().unwrap().retry_count, 1);
    }

    #[test]
    fn test_enqueued_during_sweep_waits_for_next() {
        let queue = create_test_queue();
        let first = enqueue(&queue, DEPOSIT_ENDPOINT);

        let producer = Arc::clone(&queue);
        let late = Arc::new(std::sync::Mutex::new(None));
        let late_id = Arc::clone(&late);
        let mut transport = MockTransport::new();
        transport.expect_deliver().times(2).returning(move |op| {
            if op.id == first {
                let id = enqueue(&producer, "/loans/201/transactions?command=repayment");
                *late_id.lock().unwrap() = Some(id);
            }
            Ok(())
        });

        let result = queue.drain(&transport).unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(queue.pending_count().unwrap(), 1);

        let late = late.lock().unwrap().unwrap();
        let op = queue.get(late).unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);

        let result = queue.drain(&transport).unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.results[0].id, late);
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_removed_during_sweep_is_skipped() {
        let queue = create_test_queue();
        enqueue(&queue, DEPOSIT_ENDPOINT);
        let second = enqueue(&queue, "/loans/201/transactions?command=repayment");

        let remover = Arc::clone(&queue);
        let mut transport = MockTransport::new();
        transport.expect_deliver().times(1).returning(move |_| {
            assert!(remover.remove(second).unwrap());
            Ok(())
        });

        let result = queue.drain(&transport).unwrap();

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.skipped, 1);
        assert!(queue.operations().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_drain_is_noop() {
        let queue = create_test_queue();
        let id = enqueue(&queue, DEPOSIT_ENDPOINT);

        let nested = Arc::clone(&queue);
        let saw_busy = Arc::new(AtomicBool::new(false));
        let busy_flag = Arc::clone(&saw_busy);
        let mut transport = MockTransport::new();
        transport.expect_deliver().times(1).returning(move |_| {
            assert!(nested.is_draining());
            let result = nested.drain(&Unreachable).unwrap();
            busy_flag.store(result.already_running, Ordering::SeqCst);
            Ok(())
        });

        let result = queue.drain(&transport).unwrap();

        assert!(saw_busy.load(Ordering::SeqCst));
        assert!(!result.already_running);
        assert_eq!(result.succeeded, 1);
        assert!(queue.get(id).unwrap().is_none());
        assert!(!queue.is_draining());
    }

    #[test]
    fn test_concurrent_drain_from_other_thread() {
        let queue = create_test_queue();
        enqueue(&queue, DEPOSIT_ENDPOINT);

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let started_tx = std::sync::Mutex::new(started_tx);
        let release_rx = std::sync::Mutex::new(release_rx);

        let mut transport = MockTransport::new();
        transport.expect_deliver().times(1).returning(move |_| {
            started_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            Ok(())
        });

        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::spawn(move || worker_queue.drain(&transport).unwrap());

        started_rx.recv().unwrap();
        let result = queue.drain(&Unreachable).unwrap();
        assert!(result.already_running);

        release_tx.send(()).unwrap();
        let result = worker.join().unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_storage_failure_aborts_sweep() {
        let pending = QueuedOperation::new(
            OperationKind::Deposit,
            DEPOSIT_ENDPOINT,
            HttpMethod::Post,
            json!({ "transactionAmount": 5000 }),
        );

        let saves = Arc::new(AtomicUsize::new(0));
        let save_counter = Arc::clone(&saves);
        let mut store = MockQueueStore::new();
        store
            .expect_load()
            .returning(move || Ok(vec![pending.clone()]));
        // Processing commit succeeds, recording the outcome does not
        store.expect_save().returning(move |_| {
            if save_counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(SyncError::Database("disk I/O error".to_string()))
            }
        });

        let queue = SyncQueue::with_store(store).unwrap();
        let mut transport = MockTransport::new();
        transport.expect_deliver().times(1).returning(|_| Ok(()));

        let err = queue.drain(&transport).unwrap_err();

        assert!(matches!(err, SyncError::Database(_)));
        assert_eq!(saves.load(Ordering::SeqCst), 2);
        assert!(!queue.is_draining());
    }

    #[test]
    fn test_storage_failure_before_delivery() {
        let mut store = MockQueueStore::new();
        let mut seq = Sequence::new();
        store
            .expect_load()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Vec::new()));
        store
            .expect_load()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(SyncError::Database("database is locked".to_string())));

        let queue = SyncQueue::with_store(store).unwrap();

        let err = queue.drain(&Unreachable).unwrap_err();
        assert!(err.is_storage());
    }
}
