//! The set of configured sources: catalog entries, their fetchers and the
//! federated store over them. Built whole from a catalog and never mutated;
//! a catalog change builds a new registry.

use std::sync::Arc;

use tracing::info;

use datadesk_core::catalog::validate_catalog;
use datadesk_core::config::{FetchConfig, StoreConfig};
use datadesk_core::error::DatadeskError;
use datadesk_core::{SourceDescriptor, SourceEntry};
use datadesk_source::{SnapshotSource, SourceFetcher};
use datadesk_storage::FederatedStore;

pub struct SourceRegistry {
    entries: Vec<SourceEntry>,
    fetchers: Vec<Arc<SourceFetcher>>,
    store: Arc<FederatedStore>,
}

impl SourceRegistry {
    /// Validate `entries` and build one fetcher per entry plus the store.
    pub fn build(
        entries: Vec<SourceEntry>,
        fetch: &FetchConfig,
        store: &StoreConfig,
    ) -> Result<Self, DatadeskError> {
        validate_catalog(&entries)?;

        let fetchers = entries
            .iter()
            .map(|entry| SourceFetcher::from_entry(entry, fetch).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let sources = fetchers
            .iter()
            .map(|f| Arc::clone(f) as Arc<dyn SnapshotSource>)
            .collect();
        let store = Arc::new(FederatedStore::new(sources, store.clone()));

        info!(sources = fetchers.len(), "Source registry built");
        Ok(Self {
            entries,
            fetchers,
            store,
        })
    }

    pub fn empty(store: &StoreConfig) -> Self {
        Self {
            entries: Vec::new(),
            fetchers: Vec::new(),
            store: Arc::new(FederatedStore::new(Vec::new(), store.clone())),
        }
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn fetchers(&self) -> &[Arc<SourceFetcher>] {
        &self.fetchers
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.fetchers.iter().map(|f| f.descriptor())
    }

    pub fn store(&self) -> &Arc<FederatedStore> {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    /// Physical table names, in catalog order.
    pub fn table_names(&self) -> Vec<String> {
        self.fetchers.iter().map(|f| f.safe_name().to_string()).collect()
    }

    /// Look a source up by display name or table name, ignoring case and
    /// surrounding whitespace and quotes.
    pub fn find(&self, name: &str) -> Option<&Arc<SourceFetcher>> {
        let wanted = name.trim().trim_matches(|c| c == '\'' || c == '"' || c == '`');
        if wanted.is_empty() {
            return None;
        }
        self.fetchers.iter().find(|f| {
            f.name().eq_ignore_ascii_case(wanted) || f.safe_name().eq_ignore_ascii_case(wanted)
        })
    }

    /// One `- name: description` line per source, for the router.
    pub fn menu(&self) -> String {
        self.descriptors()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("tables", &self.table_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries() -> Vec<SourceEntry> {
        serde_json::from_value(json!([
            {"name": "Equipment", "pk": "id", "description": "Machines on the floor",
             "api_url": "http://localhost:9/equip"},
            {"name": "Spare Parts", "pk": ["part_id"], "description": "Parts stock",
             "api_url": "http://localhost:9/parts",
             "relationships": [{"my_cols": ["equipment_id"], "target_table": "equipment", "target_cols": ["id"]}]}
        ]))
        .unwrap()
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::build(entries(), &FetchConfig::default(), &StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_build_and_menu() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.table_names(), vec!["equipment", "spare_parts"]);
        assert_eq!(registry.store().source_names(), registry.table_names());
        assert_eq!(
            registry.menu(),
            "- Equipment: Machines on the floor\n- Spare Parts: Parts stock"
        );
    }

    #[test]
    fn test_find_by_name_or_table() {
        let registry = registry();
        assert_eq!(registry.find("Spare Parts").unwrap().safe_name(), "spare_parts");
        assert_eq!(registry.find(" spare_parts ").unwrap().safe_name(), "spare_parts");
        assert_eq!(registry.find("'EQUIPMENT'").unwrap().safe_name(), "equipment");
        assert!(registry.find("Orders").is_none());
        assert!(registry.find("").is_none());
    }

    #[test]
    fn test_invalid_catalog_is_rejected() {
        let mut bad = entries();
        bad.push(bad[0].clone());
        let err = SourceRegistry::build(bad, &FetchConfig::default(), &StoreConfig::default())
            .unwrap_err();
        assert!(matches!(err, DatadeskError::Config(_)));
    }

    #[test]
    fn test_empty_registry() {
        let registry = SourceRegistry::empty(&StoreConfig::default());
        assert!(registry.is_empty());
        assert_eq!(registry.menu(), "");
    }
}
