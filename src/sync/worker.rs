//! Background drain loop.
//!
//! The queue never drains on its own. A [`SyncWorker`] is the trigger a host
//! application can use instead of calling [`SyncQueue::drain`] by hand: it
//! sweeps the queue on a fixed interval until shut down.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::queue::SyncQueue;
use super::transport::Transport;
use crate::error::SyncError;

/// Handle to a running drain thread. Dropping it stops the thread.
pub struct SyncWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Start draining `queue` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(
        queue: Arc<SyncQueue>,
        transport: Arc<dyn Transport>,
        interval: Duration,
    ) -> Result<Self, SyncError> {
        let (shutdown, signal) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("sync-drain".into())
            .spawn(move || {
                tracing::debug!("Sync worker started ({}ms interval)", interval.as_millis());

                loop {
                    match signal.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {},
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    match queue.drain(transport.as_ref()) {
                        Ok(result) if result.total() > 0 => {
                            tracing::debug!(
                                "Sync worker sweep: {} delivered, {} pending",
                                result.succeeded,
                                queue.pending_count().unwrap_or_default()
                            );
                        },
                        Ok(_) => {},
                        Err(e) => tracing::error!("Sync worker error: {e}"),
                    }
                }

                tracing::debug!("Sync worker stopped");
            })
            .map_err(|e| SyncError::Worker(format!("Failed to spawn sync worker: {e}")))?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Stop the loop and wait for the current sweep to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the drain thread panicked.
    pub fn shutdown(mut self) -> Result<(), SyncError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), SyncError> {
        if let Some(shutdown) = self.shutdown.take() {
            // The thread may already be gone; a closed channel stops it too
            let _ = shutdown.send(());
        }

        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| SyncError::Worker("Sync worker thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("{e}");
        }
    }
}
