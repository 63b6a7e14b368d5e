//! `SQLite` database connection.
//!
//! The database is stored at `~/.vsla/vsla.db` and holds the sync queue.
//! File-backed databases run in WAL mode with full synchronous commits so a
//! returned write survives a crash or power loss. A file database is held
//! under an exclusive lock for as long as it is open: one open handle owns the
//! queue, and a second open of the same file fails.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::config::Paths;
use crate::error::SyncError;

use super::migrations;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at the default location.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        paths.ensure_dirs()?;
        Self::open_at(&paths.database)
    }

    /// Open the database at a specific path.
    ///
    /// Creates the database file and runs migrations if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_at(path: &Path) -> Result<Self, SyncError> {
        let conn = Connection::open(path).map_err(|e| {
            SyncError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;

        Self::lock_exclusive(&conn, path)?;

        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| SyncError::Database(format!("Failed to enable WAL journal: {e}")))?;
        tracing::debug!("Opened {} (journal_mode={mode})", path.display());

        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| SyncError::Database(format!("Failed to set synchronous mode: {e}")))?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    /// Take the file lock and keep it until the connection closes.
    ///
    /// Locking mode must be set before the first WAL access so the WAL index
    /// lives in process memory rather than shared memory.
    fn lock_exclusive(conn: &Connection, path: &Path) -> Result<(), SyncError> {
        conn.busy_timeout(Duration::ZERO)
            .map_err(|e| SyncError::Database(format!("Failed to set busy timeout: {e}")))?;

        let _: String = conn
            .pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| row.get(0))
            .map_err(|e| SyncError::Database(format!("Failed to set locking mode: {e}")))?;

        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;").map_err(|e| {
            SyncError::Database(format!(
                "Database {} is already open elsewhere: {e}",
                path.display()
            ))
        })
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::Database(format!("Failed to open in-memory database: {e}"))
        })?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<(), SyncError> {
        migrations::run(&self.conn)
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, SyncError> {
        migrations::get_version(&self.conn)
    }

    /// Get a reference to the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection, for transactions.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
