//! vsla-sync - offline sync queue for a VSLA savings-group client
//!
//! Field officers record attendance, deposits and loan repayments while
//! disconnected. This crate keeps those ledger requests in a durable FIFO
//! queue and delivers them to the remote ledger once connectivity returns.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::SyncError;
pub use sync::{HttpTransport, QueuedOperation, SyncQueue, SyncWorker, Transport};
