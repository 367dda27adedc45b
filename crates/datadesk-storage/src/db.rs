//! Memory database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! File-backed databases use WAL mode; migrations run on open.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use datadesk_core::error::DatadeskError;

use crate::migrations;

/// Thread-safe SQLite database wrapper for session memory.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, DatadeskError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| DatadeskError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| DatadeskError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!(path = %path.display(), "Memory database opened");
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests, or when no data dir is usable).
    pub fn in_memory() -> Result<Self, DatadeskError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatadeskError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatadeskError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with the underlying connection. The mutex is held
    /// for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatadeskError>
    where
        F: FnOnce(&Connection) -> Result<T, DatadeskError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DatadeskError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_memories(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
                .map_err(|e| DatadeskError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(count_memories(&db), 0);
    }

    #[test]
    fn test_file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(count_memories(&db), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("memory.db")).unwrap();
        let mode: String = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .map_err(|e| DatadeskError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
