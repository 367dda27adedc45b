//! Datadesk core: error type, service configuration and the source catalog.

pub mod catalog;
pub mod config;
pub mod error;

pub use catalog::{
    safe_name, HttpMethod, KeyColumns, Relationship, RelationshipEntry, SourceDescriptor,
    SourceEntry,
};
pub use config::DatadeskConfig;
pub use error::{DatadeskError, Result};

/// One row: column name to scalar JSON value, in column order.
pub type Record = serde_json::Map<String, serde_json::Value>;
