//! Offline sync queue for ledger operations.
//!
//! Operations recorded while offline are persisted in FIFO order and
//! delivered later, one at a time, when a sweep runs.
//!
//! Features:
//! - Durable enqueue that survives restarts
//! - Bounded retries; operations that keep failing are parked for review
//! - Single-flight sweeps with recovery of interrupted deliveries
//! - Optional background worker that drains on an interval

pub mod executor;
pub mod operation;
pub mod queue;
pub mod store;
pub mod transport;
pub mod worker;

pub use executor::{ExecutionResult, SyncResult};
pub use operation::{
    HttpMethod, OperationId, OperationKind, OperationStatus, QueuedOperation, MAX_RETRIES,
};
pub use queue::{QueueStats, SyncQueue};
pub use store::{MemoryStore, QueueStore, SqliteStore};
pub use transport::{DeliveryError, HttpTransport, Transport, TENANT_HEADER};
pub use worker::SyncWorker;
