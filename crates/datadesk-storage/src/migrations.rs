//! Memory database schema migrations.

use rusqlite::Connection;
use tracing::info;

use datadesk_core::error::DatadeskError;

/// Run all pending migrations, tracked in `schema_migrations`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatadeskError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| DatadeskError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| DatadeskError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: memories");
    }

    Ok(())
}

/// Version 1: session memories.
fn apply_v1(conn: &Connection) -> Result<(), DatadeskError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memories (
            id          TEXT PRIMARY KEY NOT NULL,
            session_id  TEXT NOT NULL,
            content     TEXT NOT NULL,
            role        TEXT NOT NULL DEFAULT 'interaction',
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memories_session
            ON memories (session_id, created_at);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'memories');
        ",
    )
    .map_err(|e| DatadeskError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_memories_table_exists() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO memories (id, session_id, content, role, created_at)
             VALUES ('m-1', 'sess-1', 'User: hi', 'interaction', 1700000000000)",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE session_id = 'sess-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
