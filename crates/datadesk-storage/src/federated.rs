//! The federated store: every source's rows materialized as one table each
//! in a single in-memory SQLite database, queried with ad-hoc SQL.
//!
//! A refresh builds a complete new database and swaps it in. Queries hold an
//! `Arc` to the snapshot that was current when they started, so they never
//! observe a half-replaced table set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use datadesk_core::config::{SchemaDriftPolicy, StoreConfig};
use datadesk_core::error::DatadeskError;
use datadesk_core::Record;
use datadesk_source::{Snapshot, SnapshotSource};

use crate::guard::ensure_read_only;
use crate::schema::{SchemaChange, TableSchema};

pub const LOAD_COMPLETE: &str = "Data load complete. Tables are ready for joining.";

/// Result of running one statement. Query failures are data, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<Record>),
    Error(String),
}

impl QueryOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, QueryOutcome::Error(_))
    }

    pub fn rows(&self) -> Option<&[Record]> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::Error(_) => None,
        }
    }

    /// Text handed back to the model as the result of the SQL tool.
    pub fn to_tool_output(&self) -> String {
        match self {
            QueryOutcome::Rows(rows) => {
                serde_json::to_string(rows).unwrap_or_else(|e| format!("SQL Error: {}", e))
            }
            QueryOutcome::Error(message) => format!("SQL Error: {}", message),
        }
    }
}

/// Build the record appended to a truncated result.
pub fn truncation_sentinel(total_rows: usize) -> Record {
    let mut note = Record::new();
    note.insert(
        "System Note".to_string(),
        Value::String(format!(
            "Results truncated. {} total rows found. Please refine your query (e.g., add WHERE or LIMIT).",
            total_rows
        )),
    );
    note.insert("total_rows".to_string(), json!(total_rows));
    note
}

/// One table as materialized into a snapshot.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub name: String,
    pub schema: TableSchema,
    data: Arc<Snapshot>,
}

impl LoadedTable {
    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.data.fetched_at()
    }
}

/// One generation of the materialized database.
pub struct StoreSnapshot {
    generation: u64,
    loaded_at: DateTime<Utc>,
    tables: Vec<LoadedTable>,
    conn: Mutex<Connection>,
}

impl StoreSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn tables(&self) -> &[LoadedTable] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&LoadedTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Run one read-only statement, keeping at most `max_rows` rows.
    pub fn query(&self, sql: &str, max_rows: usize) -> QueryOutcome {
        if let Err(reason) = ensure_read_only(sql) {
            return QueryOutcome::Error(reason);
        }

        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(e) => return QueryOutcome::Error(format!("database lock poisoned: {}", e)),
        };

        match collect_rows(&conn, sql, max_rows) {
            Ok((mut rows, total)) => {
                if total > max_rows {
                    debug!(total, max_rows, "Truncating query result");
                    rows.push(truncation_sentinel(total));
                }
                QueryOutcome::Rows(rows)
            }
            Err(e) => QueryOutcome::Error(e.to_string()),
        }
    }
}

impl std::fmt::Debug for StoreSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSnapshot")
            .field("generation", &self.generation)
            .field("tables", &self.tables.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableLoad {
    pub table: String,
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaDrift {
    pub table: String,
    pub changes: Vec<SchemaChange>,
    /// True when the new shape was refused and the previous rows were kept.
    pub rejected: bool,
}

/// What a refresh did, table by table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub generation: u64,
    pub loaded: Vec<TableLoad>,
    /// Sources that returned no rows and so have no table.
    pub skipped: Vec<String>,
    pub failed: Vec<TableFailure>,
    pub drift: Vec<SchemaDrift>,
}

impl RefreshReport {
    pub fn status(&self) -> &'static str {
        LOAD_COMPLETE
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.loaded.iter().map(|t| t.table.as_str()).collect()
    }
}

/// Joinable SQL view over a fixed list of sources.
pub struct FederatedStore {
    sources: Vec<Arc<dyn SnapshotSource>>,
    config: StoreConfig,
    current: RwLock<Option<Arc<StoreSnapshot>>>,
    /// Serializes refreshes. Holds the last accepted table per source, used
    /// for drift detection.
    refresh_state: tokio::sync::Mutex<HashMap<String, LoadedTable>>,
}

impl FederatedStore {
    pub fn new(sources: Vec<Arc<dyn SnapshotSource>>, config: StoreConfig) -> Self {
        Self {
            sources,
            config,
            current: RwLock::new(None),
            refresh_state: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Safe names of every configured source, loaded or not.
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.safe_name().to_string()).collect()
    }

    /// Tables present in the current snapshot.
    pub fn table_names(&self) -> Vec<String> {
        self.current()
            .map(|snap| snap.tables.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }

    /// Generation of the current snapshot, 0 before the first refresh.
    pub fn generation(&self) -> u64 {
        self.current().map(|snap| snap.generation).unwrap_or(0)
    }

    pub fn current(&self) -> Option<Arc<StoreSnapshot>> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }

    /// Refresh once if nothing has been loaded yet.
    pub async fn ensure_loaded(&self) -> Result<(), DatadeskError> {
        if self.is_loaded() {
            return Ok(());
        }
        let mut state = self.refresh_state.lock().await;
        // Another caller may have finished a refresh while we waited.
        if self.is_loaded() {
            return Ok(());
        }
        self.refresh_locked(&mut state).await.map(|_| ())
    }

    /// Pull every source and swap in a freshly built snapshot.
    pub async fn refresh(&self) -> Result<RefreshReport, DatadeskError> {
        let mut state = self.refresh_state.lock().await;
        self.refresh_locked(&mut state).await
    }

    /// Drop cached source snapshots, then refresh.
    pub async fn reload(&self) -> Result<RefreshReport, DatadeskError> {
        let mut state = self.refresh_state.lock().await;
        for source in &self.sources {
            source.invalidate();
        }
        self.refresh_locked(&mut state).await
    }

    /// Execute one read-only statement against the current snapshot.
    pub async fn execute(&self, sql: &str) -> QueryOutcome {
        if let Err(e) = self.ensure_loaded().await {
            return QueryOutcome::Error(e.to_string());
        }
        let Some(snapshot) = self.current() else {
            return QueryOutcome::Error("store is not loaded".to_string());
        };

        let sql = sql.to_string();
        let max_rows = self.config.max_rows;
        debug!(generation = snapshot.generation, sql = %sql, "Executing query");

        match tokio::task::spawn_blocking(move || snapshot.query(&sql, max_rows)).await {
            Ok(outcome) => outcome,
            Err(e) => QueryOutcome::Error(format!("query task failed: {}", e)),
        }
    }

    async fn refresh_locked(
        &self,
        state: &mut HashMap<String, LoadedTable>,
    ) -> Result<RefreshReport, DatadeskError> {
        let fetched = self.fetch_all().await;
        let generation = self.generation() + 1;
        let previous = state.clone();
        let policy = self.config.schema_drift;

        let (snapshot, report, accepted) = tokio::task::spawn_blocking(move || {
            build_snapshot(generation, fetched, &previous, policy)
        })
        .await
        .map_err(|e| DatadeskError::Storage(format!("refresh task failed: {}", e)))??;

        for table in accepted {
            state.insert(table.name.clone(), table);
        }

        {
            let mut current = self
                .current
                .write()
                .map_err(|e| DatadeskError::Storage(format!("snapshot lock poisoned: {}", e)))?;
            *current = Some(Arc::new(snapshot));
        }

        info!(
            generation,
            tables = report.loaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Refresh complete"
        );
        Ok(report)
    }

    /// Fetch all sources concurrently, preserving source order.
    async fn fetch_all(&self) -> Vec<(String, Arc<Snapshot>)> {
        let mut tasks = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            tasks.spawn(async move { (idx, source.fetch().await) });
        }

        let mut snapshots: Vec<Option<Arc<Snapshot>>> = vec![None; self.sources.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, snapshot)) => snapshots[idx] = Some(snapshot),
                Err(e) => warn!(error = %e, "Source fetch task failed"),
            }
        }

        self.sources
            .iter()
            .zip(snapshots)
            .map(|(source, snapshot)| {
                (
                    source.safe_name().to_string(),
                    snapshot.unwrap_or_else(|| Arc::new(Snapshot::empty())),
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for FederatedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederatedStore")
            .field("sources", &self.source_names())
            .field("generation", &self.generation())
            .finish()
    }
}

type BuildResult = (StoreSnapshot, RefreshReport, Vec<LoadedTable>);

fn build_snapshot(
    generation: u64,
    fetched: Vec<(String, Arc<Snapshot>)>,
    previous: &HashMap<String, LoadedTable>,
    policy: SchemaDriftPolicy,
) -> Result<BuildResult, DatadeskError> {
    let mut conn = Connection::open_in_memory()
        .map_err(|e| DatadeskError::Storage(format!("Failed to open in-memory db: {}", e)))?;

    let mut report = RefreshReport {
        generation,
        ..RefreshReport::default()
    };
    let mut tables = Vec::new();

    for (name, data) in fetched {
        let schema = TableSchema::infer(data.rows());
        if data.is_empty() || schema.is_empty() {
            debug!(table = %name, "No rows, skipping table");
            report.skipped.push(name);
            continue;
        }

        let mut table = LoadedTable {
            name: name.clone(),
            schema,
            data,
        };

        if let Some(prior) = previous.get(&name) {
            let changes = prior.schema.diff(&table.schema);
            if !changes.is_empty() {
                let rejected = policy == SchemaDriftPolicy::Reject
                    && changes.iter().any(|c| !c.is_widening());
                let summary: Vec<String> = changes.iter().map(|c| c.to_string()).collect();
                warn!(table = %name, rejected, changes = %summary.join(", "), "Schema drift detected");
                if rejected {
                    table = prior.clone();
                }
                report.drift.push(SchemaDrift {
                    table: name.clone(),
                    changes,
                    rejected,
                });
            }
        }

        match load_table(&mut conn, &table) {
            Ok(()) => {
                info!(table = %name, rows = table.row_count(), "Loaded table");
                report.loaded.push(TableLoad {
                    table: name,
                    rows: table.row_count(),
                    columns: table.schema.columns.len(),
                });
                tables.push(table);
            }
            Err(e) => {
                error!(table = %name, error = %e, "Failed to load table");
                report.failed.push(TableFailure {
                    table: name,
                    error: e.to_string(),
                });
            }
        }
    }

    conn.execute_batch("PRAGMA query_only = ON;")
        .map_err(|e| DatadeskError::Storage(format!("Failed to set query_only: {}", e)))?;

    let accepted = tables.clone();
    let snapshot = StoreSnapshot {
        generation,
        loaded_at: Utc::now(),
        tables,
        conn: Mutex::new(conn),
    };
    Ok((snapshot, report, accepted))
}

/// Create and fill one table inside its own transaction.
fn load_table(conn: &mut Connection, table: &LoadedTable) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(&table.schema.create_table_sql(&table.name))?;
    {
        let mut stmt = tx.prepare(&table.schema.insert_sql(&table.name))?;
        for row in table.data.rows() {
            stmt.execute(rusqlite::params_from_iter(table.schema.row_values(row)))?;
        }
    }
    tx.commit()
}

/// Run `sql`, keeping the first `max_rows` rows and counting the rest.
fn collect_rows(
    conn: &Connection,
    sql: &str,
    max_rows: usize,
) -> rusqlite::Result<(Vec<Record>, usize)> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;

    let mut kept = Vec::new();
    let mut total = 0usize;
    while let Some(row) = rows.next()? {
        total += 1;
        if kept.len() < max_rows {
            let mut record = Record::new();
            for (idx, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(idx)?));
            }
            kept.push(record);
        }
    }
    Ok((kept, total))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
