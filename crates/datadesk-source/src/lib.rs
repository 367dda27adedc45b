//! Datadesk source crate - remote table fetching and snapshot caching.
//!
//! Provides the `SnapshotSource` trait consumed by the federated store, the
//! HTTP-backed `SourceFetcher`, and a `StaticSource` for tests.

pub mod fetcher;
pub mod snapshot;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use datadesk_core::Record;

pub use fetcher::{display_columns, extract_rows, render_schema, SourceFetcher};
pub use snapshot::Snapshot;

/// Anything that can produce a snapshot of rows for one physical table.
///
/// `fetch` never fails: an unavailable source yields an empty snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Physical table name the rows are loaded under.
    fn safe_name(&self) -> &str;

    /// Current snapshot, fetching if necessary.
    async fn fetch(&self) -> Arc<Snapshot>;

    /// Forget any cached snapshot.
    fn invalidate(&self) {}
}

/// In-memory source with replaceable rows.
///
/// Counts fetches so tests can assert on caching behaviour.
#[derive(Debug)]
pub struct StaticSource {
    safe_name: String,
    rows: Mutex<Vec<Record>>,
    fetches: Mutex<usize>,
}

impl StaticSource {
    pub fn new(safe_name: &str, rows: Vec<Record>) -> Self {
        Self {
            safe_name: safe_name.to_string(),
            rows: Mutex::new(rows),
            fetches: Mutex::new(0),
        }
    }

    /// Build from a JSON array of objects; non-objects are skipped.
    pub fn from_json(safe_name: &str, rows: serde_json::Value) -> Self {
        let rows = rows
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_object().cloned()).collect())
            .unwrap_or_default();
        Self::new(safe_name, rows)
    }

    /// Replace the rows returned by subsequent fetches.
    pub fn set_rows(&self, rows: Vec<Record>) {
        if let Ok(mut current) = self.rows.lock() {
            *current = rows;
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    fn safe_name(&self) -> &str {
        &self.safe_name
    }

    async fn fetch(&self) -> Arc<Snapshot> {
        if let Ok(mut n) = self.fetches.lock() {
            *n += 1;
        }
        let rows = self.rows.lock().map(|r| r.clone()).unwrap_or_default();
        Arc::new(Snapshot::new(rows))
    }
}
