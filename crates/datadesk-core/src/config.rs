use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DatadeskError, Result};

/// Top-level configuration for the Datadesk service.
///
/// Loaded from `~/.datadesk/config.toml` by default. The source catalog
/// itself lives in a separate JSON file referenced by `general.sources_file`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatadeskConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl DatadeskConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DatadeskConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| DatadeskError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the session memory database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port for the API server.
    pub port: u16,
    /// Path of the JSON source catalog.
    pub sources_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.datadesk/data".to_string(),
            log_level: "info".to_string(),
            port: 8005,
            sources_file: "~/.datadesk/sources.json".to_string(),
        }
    }
}

/// Remote source fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Skip TLS certificate validation. Sources are internal endpoints,
    /// frequently behind self-signed certificates.
    pub accept_invalid_certs: bool,
    /// Snapshot lifetime in seconds. `None` keeps a snapshot until the
    /// fetcher is rebuilt or explicitly invalidated.
    pub cache_ttl_secs: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            accept_invalid_certs: true,
            cache_ttl_secs: None,
        }
    }
}

/// What to do when a table's inferred schema changes between refreshes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaDriftPolicy {
    /// Load the new shape and report the drift.
    #[default]
    Warn,
    /// Keep the previously loaded rows for the drifted table.
    Reject,
}

/// Federated store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of rows returned by a single query.
    pub max_rows: usize,
    /// Schema drift handling.
    pub schema_drift: SchemaDriftPolicy,
    /// Load every source at start-up instead of on first query.
    pub refresh_on_start: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_rows: 50,
            schema_drift: SchemaDriftPolicy::Warn,
            refresh_on_start: false,
        }
    }
}

/// Chat-completions provider flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Azure,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Azure => "azure",
            LlmProvider::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAi => Some("https://api.openai.com/v1"),
            LlmProvider::Ollama => Some("http://localhost:11434/v1"),
            LlmProvider::Azure => None,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::Ollama)
    }
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Model name, or deployment name for Azure.
    pub model: String,
    /// Endpoint root. Required for Azure.
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Azure `api-version` query parameter.
    pub api_version: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Upper bound on model calls per agent turn.
    pub max_iterations: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            model: "gpt-4.1-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_version: "2024-12-01-preview".to_string(),
            temperature: 0.0,
            max_tokens: None,
            max_iterations: 15,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| self.provider.default_base_url().map(String::from))
    }
}

/// Session memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Number of most recent interactions replayed verbatim; older ones are summarized.
    pub window_size: usize,
    /// Maximum number of facts returned by a memory search.
    pub search_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            search_limit: 5,
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        std::path::PathBuf::from(home).join(rest)
    } else {
        std::path::PathBuf::from(path)
    }
}
