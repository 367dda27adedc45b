//! Datadesk storage crate - the federated SQL store and session memory.
//!
//! `FederatedStore` materializes every source as a table of one in-memory
//! SQLite database and runs read-only SQL over the union. `MemoryStore`
//! persists per-session conversation memory in a migrated SQLite file.

pub mod db;
pub mod federated;
pub mod guard;
pub mod memory;
pub mod migrations;
pub mod schema;

pub use db::Database;
pub use federated::{
    truncation_sentinel, FederatedStore, LoadedTable, QueryOutcome, RefreshReport, SchemaDrift,
    StoreSnapshot, TableFailure, TableLoad, LOAD_COMPLETE,
};
pub use guard::{ensure_read_only, READ_ONLY_MESSAGE};
pub use memory::{MemoryEntry, MemoryStore, ROLE_INTERACTION};
pub use schema::{ColumnDef, ColumnType, SchemaChange, TableSchema};
