//! One materialized pull of a source, with the metadata needed to tell
//! how old it is.

use std::time::Duration;

use chrono::{DateTime, Utc};

use datadesk_core::Record;

/// Rows fetched from one source at one point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    rows: Vec<Record>,
    fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(rows: Vec<Record>) -> Self {
        Self {
            rows,
            fetched_at: Utc::now(),
        }
    }

    /// The "no data" snapshot returned for unreachable or malformed sources.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Override the fetch time (tests and restored snapshots).
    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Time elapsed since the fetch, clamped at zero.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at).to_std().unwrap_or_default()
    }

    /// Whether the snapshot has outlived `ttl`. No TTL means never stale.
    pub fn is_stale(&self, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => self.age() >= ttl,
            None => false,
        }
    }
}
