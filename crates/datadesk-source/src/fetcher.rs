//! HTTP source fetcher.
//!
//! Pulls one source's rows from its REST endpoint, caches the snapshot, and
//! renders the schema document handed to the model. Fetch failures never
//! surface as errors: an unreachable or malformed source is an empty table.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use datadesk_core::config::FetchConfig;
use datadesk_core::{DatadeskError, HttpMethod, Record, Result, SourceDescriptor, SourceEntry};

use crate::snapshot::Snapshot;
use crate::SnapshotSource;

/// Number of sample rows included in a schema document.
const EXAMPLE_ROWS: usize = 3;

/// Fetches and caches one source.
pub struct SourceFetcher {
    descriptor: SourceDescriptor,
    endpoint_url: String,
    http_method: HttpMethod,
    headers: HeaderMap,
    request_payload: Map<String, Value>,
    response_json_key: String,
    safe_name: String,
    cache_ttl: Option<Duration>,
    client: Client,
    cache: RwLock<Option<Arc<Snapshot>>>,
}

impl SourceFetcher {
    /// Build a fetcher from a catalog entry.
    pub fn from_entry(entry: &SourceEntry, config: &FetchConfig) -> Result<Self> {
        let descriptor = entry.descriptor()?;
        let headers = build_headers(&entry.headers())
            .map_err(|e| DatadeskError::Config(format!("source '{}': {}", entry.name, e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| DatadeskError::Source(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            safe_name: descriptor.safe_name(),
            descriptor,
            endpoint_url: entry.api_url.clone(),
            http_method: entry.method(),
            headers,
            request_payload: entry.payload(),
            response_json_key: entry.json_key().to_string(),
            cache_ttl: config.cache_ttl_secs.map(Duration::from_secs),
            client,
            cache: RwLock::new(None),
        })
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// The cached snapshot, if one exists and has not expired.
    pub fn cached(&self) -> Option<Arc<Snapshot>> {
        let cache = self.cache.read().ok()?;
        cache
            .as_ref()
            .filter(|snap| !snap.is_stale(self.cache_ttl))
            .cloned()
    }

    /// Age of the cached snapshot, expired or not.
    pub fn snapshot_age(&self) -> Option<Duration> {
        self.cache
            .read()
            .ok()
            .and_then(|c| c.as_ref().map(|snap| snap.age()))
    }

    /// Return the cached snapshot or pull a fresh one.
    pub async fn fetch(&self) -> Arc<Snapshot> {
        if let Some(snap) = self.cached() {
            return snap;
        }

        match self.request_rows().await {
            Ok(rows) => {
                info!(source = %self.safe_name, rows = rows.len(), "Source fetched");
                let snap = Arc::new(Snapshot::new(rows));
                if let Ok(mut cache) = self.cache.write() {
                    *cache = Some(Arc::clone(&snap));
                }
                snap
            }
            Err(e) => {
                warn!(
                    source = %self.safe_name,
                    url = %self.endpoint_url,
                    error = %e,
                    "Source unavailable, treating as empty"
                );
                Arc::new(Snapshot::empty())
            }
        }
    }

    /// Drop the cached snapshot so the next fetch goes to the network.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }

    /// Schema document for the model: static metadata plus, when data is
    /// available, the column set and a few example rows.
    pub async fn describe(&self) -> String {
        let snapshot = self.fetch().await;
        render_schema(
            &self.descriptor,
            &self.request_payload,
            snapshot.rows(),
        )
    }

    async fn request_rows(&self) -> Result<Vec<Record>> {
        let request = match self.http_method {
            HttpMethod::Post => self
                .client
                .post(&self.endpoint_url)
                .json(&self.request_payload),
            HttpMethod::Get => self
                .client
                .get(&self.endpoint_url)
                .query(&query_params(&self.request_payload)),
        };

        debug!(source = %self.safe_name, method = ?self.http_method, "Requesting source");

        let response = request
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| DatadeskError::Source(format!("request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(DatadeskError::Source(format!("HTTP {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DatadeskError::Source(format!("invalid JSON body: {}", e)))?;

        extract_rows(&body, &self.response_json_key)
    }
}

#[async_trait]
impl SnapshotSource for SourceFetcher {
    fn safe_name(&self) -> &str {
        &self.safe_name
    }

    async fn fetch(&self) -> Arc<Snapshot> {
        SourceFetcher::fetch(self).await
    }

    fn invalidate(&self) {
        SourceFetcher::invalidate(self)
    }
}

impl std::fmt::Debug for SourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFetcher")
            .field("safe_name", &self.safe_name)
            .field("endpoint_url", &self.endpoint_url)
            .field("http_method", &self.http_method)
            .finish()
    }
}

fn build_headers(headers: &BTreeMap<String, String>) -> std::result::Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("invalid header name '{}': {}", name, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("invalid header value for '{}': {}", name, e))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Flatten a payload into query parameters. Arrays repeat their key.
fn query_params(payload: &Map<String, Value>) -> Vec<(String, String)> {
    let mut params = Vec::new();
    for (key, value) in payload {
        match value {
            Value::Array(items) => {
                for item in items {
                    params.push((key.clone(), scalar_param(item)));
                }
            }
            Value::Null => {}
            other => params.push((key.clone(), scalar_param(other))),
        }
    }
    params
}

fn scalar_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pull the row array out of a response body.
///
/// The body must be a JSON object. A missing or null key yields no rows; a
/// non-array value is malformed. Array elements that are not objects are
/// dropped.
pub fn extract_rows(body: &Value, json_key: &str) -> Result<Vec<Record>> {
    let object = body
        .as_object()
        .ok_or_else(|| DatadeskError::Source("response body is not a JSON object".into()))?;

    let items = match object.get(json_key) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(DatadeskError::Source(format!(
                "response key '{}' is not an array",
                json_key
            )))
        }
    };

    let rows: Vec<Record> = items
        .iter()
        .filter_map(|item| item.as_object().cloned())
        .collect();

    if rows.len() < items.len() {
        debug!(
            dropped = items.len() - rows.len(),
            "Dropped non-object array elements"
        );
    }

    Ok(rows)
}

/// Columns shown to the model.
///
/// With a non-empty `attributes` list in the payload: those attributes in
/// order, then any key or join column not already listed. Otherwise the keys
/// of the first row.
pub fn display_columns(
    descriptor: &SourceDescriptor,
    payload: &Map<String, Value>,
    rows: &[Record],
) -> Vec<String> {
    let requested: Vec<String> = payload
        .get("attributes")
        .and_then(Value::as_array)
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    if requested.is_empty() {
        return rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
    }

    let mut columns = Vec::with_capacity(requested.len());
    for col in requested.into_iter().chain(descriptor.mandatory_columns()) {
        if !columns.contains(&col) {
            columns.push(col);
        }
    }
    columns
}

/// Render the schema document for one source.
pub fn render_schema(
    descriptor: &SourceDescriptor,
    payload: &Map<String, Value>,
    rows: &[Record],
) -> String {
    let table = descriptor.safe_name();
    let mut info = format!(
        "TABLE: {}\nDESCRIPTION: {}\n",
        table, descriptor.description
    );
    info.push_str(&format!(
        "PRIMARY KEY: {}\n",
        descriptor.primary_key.join(", ")
    ));

    if let Some(ref name_field) = descriptor.name_field {
        info.push_str(&format!("NAME COLUMN: '{}'\n", name_field));
    }

    if !descriptor.relationships.is_empty() {
        info.push_str("RELATIONSHIPS (JOINS) - STRICTLY FOLLOW THESE:\n");
        for rel in &descriptor.relationships {
            info.push_str(&format!(
                "  - JOIN {}.{} = {}.{}\n",
                table,
                rel.local_columns.join(", "),
                rel.target_table,
                rel.target_columns.join(", ")
            ));
        }
    }

    if rows.is_empty() {
        return info;
    }

    let columns = display_columns(descriptor, payload, rows);
    info.push_str(&format!("ALL COLUMNS: {}\n", columns.join(", ")));
    info.push_str("\nEXAMPLE ROWS:\n");
    for (i, row) in rows.iter().take(EXAMPLE_ROWS).enumerate() {
        let shown: Record = columns
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        info.push_str(&format!("Row {}: {}\n", i + 1, Value::Object(shown)));
    }

    info
}
