//! Per-session conversational memory persisted in SQLite.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use datadesk_core::error::DatadeskError;

use crate::db::Database;

/// Role recorded for a full user/assistant exchange.
pub const ROLE_INTERACTION: &str = "interaction";

/// One remembered item of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub session_id: String,
    pub content: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Repository for session memories.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    db: Arc<Database>,
}

impl MemoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Memory store over a throwaway in-memory database.
    pub fn in_memory() -> Result<Self, DatadeskError> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    /// Append an entry to a session.
    pub fn add(
        &self,
        session_id: &str,
        content: &str,
        role: &str,
    ) -> Result<MemoryEntry, DatadeskError> {
        let entry = MemoryEntry {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            content: content.to_string(),
            role: role.to_string(),
            created_at: Utc::now(),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memories (id, session_id, content, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    entry.id.to_string(),
                    entry.session_id,
                    entry.content,
                    entry.role,
                    entry.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| DatadeskError::Storage(format!("Failed to save memory: {}", e)))?;
            Ok(())
        })?;

        Ok(entry)
    }

    /// All entries of a session, oldest first.
    pub fn get_all(&self, session_id: &str) -> Result<Vec<MemoryEntry>, DatadeskError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, session_id, content, role, created_at
                     FROM memories WHERE session_id = ?1
                     ORDER BY created_at ASC, rowid ASC",
                )
                .map_err(|e| DatadeskError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![session_id], row_to_entry)
                .map_err(|e| DatadeskError::Storage(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| DatadeskError::Storage(e.to_string()))
        })
    }

    /// Entries sharing the most words with `query`, most recent first among
    /// equals. Entries with no overlap are not returned.
    pub fn search(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, DatadeskError> {
        let terms = tokenize(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, usize, MemoryEntry)> = self
            .get_all(session_id)?
            .into_iter()
            .enumerate()
            .filter_map(|(order, entry)| {
                let words = tokenize(&entry.content);
                let score = terms.intersection(&words).count();
                (score > 0).then_some((score, order, entry))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        Ok(scored.into_iter().take(limit).map(|(_, _, e)| e).collect())
    }

    pub fn count(&self, session_id: &str) -> Result<usize, DatadeskError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM memories WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )
                .map_err(|e| DatadeskError::Storage(e.to_string()))?;
            Ok(n as usize)
        })
    }

    /// Delete every entry of a session. Returns how many were removed.
    pub fn clear(&self, session_id: &str) -> Result<usize, DatadeskError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM memories WHERE session_id = ?1",
                rusqlite::params![session_id],
            )
            .map_err(|e| DatadeskError::Storage(format!("Failed to clear memories: {}", e)))
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let id: String = row.get(0)?;
    let millis: i64 = row.get(4)?;
    Ok(MemoryEntry {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        session_id: row.get(1)?,
        content: row.get(2)?,
        role: row.get(3)?,
        created_at: Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

/// Lowercased words of two or more characters.
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_lowercase())
        .collect()
}
