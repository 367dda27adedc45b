//! Tools offered to the agent: one schema description per selected source
//! and a single SQL tool over the federated store.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use datadesk_source::{SnapshotSource, SourceFetcher};
use datadesk_storage::FederatedStore;

use crate::registry::SourceRegistry;
use crate::types::{ToolCall, ToolSpec};

pub const SQL_TOOL: &str = "execute_global_sql";
pub const DESCRIBE_PREFIX: &str = "describe_";

/// One executed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub tool: String,
    pub input: String,
    pub output: String,
}

/// The tools available for one agent turn.
pub struct ToolBox {
    store: Arc<FederatedStore>,
    table_names: Vec<String>,
    describers: Vec<Arc<SourceFetcher>>,
}

impl ToolBox {
    /// SQL tool plus a describe tool for every selected source that exists.
    pub fn new(registry: &SourceRegistry, selected: &[String]) -> Self {
        let mut describers: Vec<Arc<SourceFetcher>> = Vec::new();
        for name in selected {
            match registry.find(name) {
                Some(fetcher) => {
                    if !describers.iter().any(|d| d.safe_name() == fetcher.safe_name()) {
                        describers.push(Arc::clone(fetcher));
                    }
                }
                None => debug!(name = %name, "Router selected an unknown table"),
            }
        }

        Self {
            store: Arc::clone(registry.store()),
            table_names: registry.table_names(),
            describers,
        }
    }

    /// Only the SQL tool.
    pub fn sql_only(registry: &SourceRegistry) -> Self {
        Self::new(registry, &[])
    }

    /// Tool names, SQL tool first.
    pub fn names(&self) -> Vec<String> {
        std::iter::once(SQL_TOOL.to_string())
            .chain(
                self.describers
                    .iter()
                    .map(|d| format!("{}{}", DESCRIBE_PREFIX, d.safe_name())),
            )
            .collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs = vec![ToolSpec {
            name: SQL_TOOL.to_string(),
            description: format!(
                "Executes SQL queries on the Central Database. Available tables: {}. \
                 You can perform JOINS between these tables.",
                self.table_names.join(", ")
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "A single SQLite SELECT statement."}
                },
                "required": ["query"]
            }),
        }];

        for fetcher in &self.describers {
            specs.push(ToolSpec {
                name: format!("{}{}", DESCRIBE_PREFIX, fetcher.safe_name()),
                description: format!(
                    "Returns the database schema and sample rows for the '{}' table. \
                     Use this to understand the columns before querying.",
                    fetcher.name()
                ),
                parameters: json!({"type": "object", "properties": {}}),
            });
        }
        specs
    }

    /// Run one tool call. Unknown tools and bad arguments produce an error
    /// text for the model rather than failing the turn.
    pub async fn invoke(&self, call: &ToolCall) -> ToolOutput {
        if call.name == SQL_TOOL {
            let query = sql_argument(&call.arguments);
            let output = match &query {
                Some(sql) => self.store.execute(sql).await.to_tool_output(),
                None => "SQL Error: missing 'query' argument".to_string(),
            };
            return ToolOutput {
                tool: call.name.clone(),
                input: query.unwrap_or_default(),
                output,
            };
        }

        let describer = call
            .name
            .strip_prefix(DESCRIBE_PREFIX)
            .and_then(|table| self.describers.iter().find(|d| d.safe_name() == table));

        let output = match describer {
            Some(fetcher) => fetcher.describe().await,
            None => format!(
                "Error: {} is not a valid tool, try one of [{}].",
                call.name,
                self.names().join(", ")
            ),
        };
        ToolOutput {
            tool: call.name.clone(),
            input: String::new(),
            output,
        }
    }
}

/// The SQL text of a tool call: the `query` field, a bare string, or the
/// only string field of the arguments object.
fn sql_argument(arguments: &Value) -> Option<String> {
    let sql = match arguments {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("query")
            .and_then(Value::as_str)
            .or_else(|| {
                let mut strings = map.values().filter_map(Value::as_str);
                match (strings.next(), strings.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            })
            .map(String::from),
        _ => None,
    };
    sql.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datadesk_core::config::{FetchConfig, StoreConfig};
    use datadesk_core::SourceEntry;

    fn registry() -> SourceRegistry {
        let entries: Vec<SourceEntry> = serde_json::from_value(json!([
            {"name": "Equipment", "pk": "id", "description": "Machines",
             "api_url": "http://127.0.0.1:1/equip"},
            {"name": "Spare Parts", "pk": "part_id", "description": "Parts",
             "api_url": "http://127.0.0.1:1/parts"}
        ]))
        .unwrap();
        SourceRegistry::build(entries, &FetchConfig::default(), &StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_specs_for_selection() {
        let registry = registry();
        let tools = ToolBox::new(
            &registry,
            &["Spare Parts".to_string(), "Orders".to_string(), "spare_parts".to_string()],
        );
        assert_eq!(tools.names(), vec!["execute_global_sql", "describe_spare_parts"]);

        let specs = tools.specs();
        assert!(specs[0]
            .description
            .contains("Available tables: equipment, spare_parts."));
        assert!(specs[1].description.contains("'Spare Parts' table"));
    }

    #[test]
    fn test_sql_only() {
        assert_eq!(ToolBox::sql_only(&registry()).names(), vec!["execute_global_sql"]);
    }

    #[test]
    fn test_sql_argument_forms() {
        assert_eq!(sql_argument(&json!({"query": "SELECT 1"})).as_deref(), Some("SELECT 1"));
        assert_eq!(sql_argument(&json!("SELECT 2")).as_deref(), Some("SELECT 2"));
        assert_eq!(sql_argument(&json!({"__arg1": "SELECT 3"})).as_deref(), Some("SELECT 3"));
        assert_eq!(sql_argument(&json!({"a": "x", "b": "y"})), None);
        assert_eq!(sql_argument(&json!({"query": "  "})), None);
        assert_eq!(sql_argument(&json!(5)), None);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_model() {
        let tools = ToolBox::new(&registry(), &["Equipment".to_string()]);
        let out = tools
            .invoke(&ToolCall {
                id: "1".into(),
                name: "describe_orders".into(),
                arguments: json!({}),
            })
            .await;
        assert!(out.output.starts_with("Error: describe_orders is not a valid tool"));
        assert!(out.output.contains("describe_equipment"));
    }

    #[tokio::test]
    async fn test_missing_sql_argument() {
        let tools = ToolBox::sql_only(&registry());
        let out = tools
            .invoke(&ToolCall {
                id: "1".into(),
                name: SQL_TOOL.into(),
                arguments: json!({}),
            })
            .await;
        assert_eq!(out.output, "SQL Error: missing 'query' argument");
    }
}
