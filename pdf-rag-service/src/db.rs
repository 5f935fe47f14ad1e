//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct and all database operations
//! organized into submodules by domain: the job queue, the vector index
//! entries, and runtime settings.

mod entries;
mod jobs;
mod migrations;
pub mod models;
mod settings;

pub use entries::{SearchOutcome, UpsertOutcome};
pub use models::{DocumentChunk, IndexEntry, JobRecord, JobStatus, LeasedJob, ScoredEntry};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::DatabaseError;

/// Result type for database operations
pub type DbResult<T> = Result<T, DatabaseError>;

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> DbResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;
        Self::init(conn)
    }

    /// Open a private in-memory database
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        // WAL lets the query path read while workers write
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(DatabaseError::Query)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }
}
