//! Source catalog: the JSON file describing every federated source, and the
//! normalized `SourceDescriptor` model built from it.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{DatadeskError, Result};

/// Default key holding the row array in a source's response body.
pub const DEFAULT_JSON_KEY: &str = "data";

/// Normalize a human table name into its physical identifier.
pub fn safe_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

// =============================================================================
// Catalog file entries
// =============================================================================

/// A primary key given either as one column or as an ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyColumns {
    One(String),
    Many(Vec<String>),
}

impl KeyColumns {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            KeyColumns::One(col) => vec![col.clone()],
            KeyColumns::Many(cols) => cols.clone(),
        }
    }
}

/// HTTP verb used to pull a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Get,
}

/// A join hint as written in the catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEntry {
    pub my_cols: Vec<String>,
    pub target_table: String,
    pub target_cols: Vec<String>,
}

/// One element of the catalog JSON array.
///
/// Optional fields stay optional so that a save/load cycle writes back
/// exactly what was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub pk: KeyColumns,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_field: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Vec<RelationshipEntry>>,
    pub api_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl SourceEntry {
    /// Build the validated descriptor for this entry.
    pub fn descriptor(&self) -> Result<SourceDescriptor> {
        let relationships = self
            .relationships
            .iter()
            .flatten()
            .map(|r| Relationship {
                local_columns: r.my_cols.clone(),
                target_table: r.target_table.clone(),
                target_columns: r.target_cols.clone(),
            })
            .collect();

        SourceDescriptor::new(
            &self.name,
            self.pk.to_vec(),
            &self.description,
            self.name_field.clone(),
            relationships,
        )
    }

    pub fn json_key(&self) -> &str {
        self.json_key.as_deref().unwrap_or(DEFAULT_JSON_KEY)
    }

    pub fn method(&self) -> HttpMethod {
        self.method.unwrap_or_default()
    }

    pub fn payload(&self) -> Map<String, Value> {
        self.payload.clone().unwrap_or_default()
    }

    /// Request headers, defaulting to a JSON content type.
    pub fn headers(&self) -> BTreeMap<String, String> {
        self.headers.clone().unwrap_or_else(|| {
            BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
        })
    }
}

// =============================================================================
// Normalized descriptor
// =============================================================================

/// Directional foreign-key hint. Advisory only: surfaced to the model,
/// never enforced by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub local_columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
}

/// Static description of one external table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub primary_key: Vec<String>,
    pub description: String,
    pub name_field: Option<String>,
    pub relationships: Vec<Relationship>,
}

impl SourceDescriptor {
    /// Create a descriptor, enforcing a non-empty key and balanced join columns.
    pub fn new(
        name: &str,
        primary_key: Vec<String>,
        description: &str,
        name_field: Option<String>,
        relationships: Vec<Relationship>,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(DatadeskError::Config("source name must not be empty".into()));
        }
        if primary_key.is_empty() || primary_key.iter().any(|c| c.trim().is_empty()) {
            return Err(DatadeskError::Config(format!(
                "source '{}': primary key must name at least one column",
                name
            )));
        }
        for rel in &relationships {
            if rel.local_columns.is_empty()
                || rel.local_columns.len() != rel.target_columns.len()
            {
                return Err(DatadeskError::Config(format!(
                    "source '{}': relationship to '{}' has {} local and {} target columns",
                    name,
                    rel.target_table,
                    rel.local_columns.len(),
                    rel.target_columns.len()
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            primary_key,
            description: description.to_string(),
            name_field,
            relationships,
        })
    }

    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }

    /// Columns that must always be visible: the primary key followed by
    /// every local join column, without duplicates.
    pub fn mandatory_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.primary_key
            .iter()
            .chain(self.relationships.iter().flat_map(|r| r.local_columns.iter()))
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }
}

// =============================================================================
// Catalog file I/O
// =============================================================================

/// Validate a whole catalog: every entry must build a descriptor and no two
/// entries may share a physical table name.
pub fn validate_catalog(entries: &[SourceEntry]) -> Result<()> {
    let mut names = HashSet::new();
    for entry in entries {
        let descriptor = entry.descriptor()?;
        if entry.api_url.trim().is_empty() {
            return Err(DatadeskError::Config(format!(
                "source '{}': api_url must not be empty",
                entry.name
            )));
        }
        if !names.insert(descriptor.safe_name()) {
            return Err(DatadeskError::Config(format!(
                "duplicate table name '{}'",
                descriptor.safe_name()
            )));
        }
    }
    Ok(())
}

/// Load the catalog. A missing file is an empty catalog.
pub fn load_catalog(path: &Path) -> Result<Vec<SourceEntry>> {
    if !path.exists() {
        info!(path = %path.display(), "No source catalog found, starting empty");
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<SourceEntry> = serde_json::from_str(&content)?;
    validate_catalog(&entries)?;
    info!(path = %path.display(), sources = entries.len(), "Source catalog loaded");
    Ok(entries)
}

/// Write the catalog as indented JSON.
///
/// The content goes to a temporary file in the same directory which is then
/// renamed over `path`, so readers see either the old or the new catalog.
pub fn save_catalog(path: &Path, entries: &[SourceEntry]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let content = serde_json::to_string_pretty(entries)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| DatadeskError::Io(e.error))?;
    info!(path = %path.display(), sources = entries.len(), "Source catalog saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Vec<SourceEntry> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("Work Orders"), "work_orders");
        assert_eq!(safe_name("Equipment"), "equipment");
        assert_eq!(safe_name("Spare  Parts"), "spare__parts");
    }

    #[test]
    fn test_scalar_pk_normalizes_to_list() {
        let entries = parse(json!([{
            "name": "Equipment", "pk": "id", "description": "Machines",
            "api_url": "http://mock/equip"
        }]));
        let d = entries[0].descriptor().unwrap();
        assert_eq!(d.primary_key, vec!["id".to_string()]);
        assert_eq!(entries[0].json_key(), "data");
        assert_eq!(entries[0].method(), HttpMethod::Post);
        assert!(entries[0].payload().is_empty());
        assert_eq!(
            entries[0].headers().get("Content-Type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_composite_pk_and_relationships() {
        let entries = parse(json!([{
            "name": "Work Orders", "pk": ["site", "order_no"], "description": "WOs",
            "name_field": "title",
            "relationships": [
                {"my_cols": ["equipment_id"], "target_table": "equipment", "target_cols": ["id"]},
                {"my_cols": ["site", "line"], "target_table": "lines", "target_cols": ["site", "line"]}
            ],
            "api_url": "http://mock/wo", "method": "GET"
        }]));
        let d = entries[0].descriptor().unwrap();
        assert_eq!(d.safe_name(), "work_orders");
        assert_eq!(d.relationships.len(), 2);
        assert_eq!(d.relationships[0].target_table, "equipment");
        assert_eq!(
            d.mandatory_columns(),
            vec!["site", "order_no", "equipment_id", "line"]
        );
        assert_eq!(entries[0].method(), HttpMethod::Get);
    }

    #[test]
    fn test_empty_pk_rejected() {
        let entries = parse(json!([{
            "name": "Bad", "pk": [], "description": "", "api_url": "http://x"
        }]));
        let err = entries[0].descriptor().unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }

    #[test]
    fn test_unbalanced_relationship_rejected() {
        let entries = parse(json!([{
            "name": "Bad", "pk": "id", "description": "",
            "relationships": [{"my_cols": ["a", "b"], "target_table": "t", "target_cols": ["a"]}],
            "api_url": "http://x"
        }]));
        assert!(entries[0].descriptor().is_err());
    }

    #[test]
    fn test_duplicate_safe_names_rejected() {
        let entries = parse(json!([
            {"name": "Work Orders", "pk": "id", "description": "", "api_url": "http://a"},
            {"name": "work orders", "pk": "id", "description": "", "api_url": "http://b"}
        ]));
        let err = validate_catalog(&entries).unwrap_err();
        assert!(err.to_string().contains("work_orders"));
    }

    #[test]
    fn test_missing_catalog_is_empty() {
        let entries = load_catalog(Path::new("/nonexistent/sources.json")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let original = parse(json!([
            {
                "name": "Equipment", "pk": "id", "description": "Machines on the floor",
                "api_url": "http://mock/equip", "json_key": "data", "payload": {}
            },
            {
                "name": "Work Orders", "pk": ["site", "order_no"], "name_field": "title",
                "description": "Open work orders",
                "relationships": [
                    {"my_cols": ["equipment_id"], "target_table": "equipment", "target_cols": ["id"]},
                    {"my_cols": ["site"], "target_table": "sites", "target_cols": ["code"]}
                ],
                "api_url": "http://mock/wo", "json_key": "items",
                "payload": {"attributes": ["title", "status"], "limit": 500}
            }
        ]));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        save_catalog(&path, &original).unwrap();
        let reloaded = load_catalog(&path).unwrap();

        assert_eq!(reloaded, original);
        let rels = reloaded[1].relationships.as_ref().unwrap();
        assert_eq!(rels[0].target_table, "equipment");
        assert_eq!(rels[1].target_table, "sites");
        assert_eq!(reloaded[0].pk, KeyColumns::One("id".to_string()));
    }

    #[test]
    fn test_save_replaces_existing_catalog_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(&path, "[]").unwrap();

        let entries = parse(json!([
            {"name": "Equipment", "pk": "id", "description": "Machines", "api_url": "http://mock/eq"}
        ]));
        save_catalog(&path, &entries).unwrap();

        assert_eq!(load_catalog(&path).unwrap(), entries);
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from("sources.json")]);
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_catalog(&path).unwrap_err();
        assert!(matches!(err, DatadeskError::Serialization(_)));
    }
}
