//! Route handler functions for all API endpoints.
//!
//! Chat, history, refresh and catalog updates report failures inside their
//! normal JSON shape so the chat front end can render them as messages.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use datadesk_chat::{ChatError, ChatReply, ChatRequest, SourceRegistry};
use datadesk_core::catalog::save_catalog;
use datadesk_core::SourceEntry;
use datadesk_storage::RefreshReport;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Configured sources.
    pub sources: usize,
    /// Tables in the current store snapshot.
    pub tables: usize,
    pub loaded: bool,
    pub generation: u64,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RefreshReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigUpdateResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.registry();
    let store = registry.store();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        sources: registry.len(),
        tables: store.table_names().len(),
        loaded: store.is_loaded(),
        generation: store.generation(),
    })
}

/// POST /chat - answer one chat turn.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    info!(
        session = %request.session_id,
        language = %request.language,
        "Received chat query"
    );
    let registry = state.registry();

    match state.chat.run(&registry, &request).await {
        Ok(reply) => Ok(Json(reply_to_json(reply)?)),
        Err(ChatError::EmptyMessage) => Err(ApiError::from(ChatError::EmptyMessage)),
        Err(e) => {
            error!(session = %request.session_id, error = %e, "Error processing query");
            Ok(Json(json!({"response": format!("An error occurred: {}", e)})))
        }
    }
}

fn reply_to_json(reply: ChatReply) -> Result<Value, ApiError> {
    serde_json::to_value(reply)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize reply: {}", e)))
}

/// POST /history - stored interactions of a session, oldest first.
pub async fn history(
    State(state): State<AppState>,
    Json(request): Json<HistoryRequest>,
) -> Json<HistoryResponse> {
    match state.chat.history(&request.session_id) {
        Ok(history) => {
            info!(session = %request.session_id, messages = history.len(), "History retrieved");
            Json(HistoryResponse {
                history,
                error: None,
            })
        }
        Err(e) => {
            error!(session = %request.session_id, error = %e, "History lookup failed");
            Json(HistoryResponse {
                history: Vec::new(),
                error: Some(e.to_string()),
            })
        }
    }
}

/// POST /refresh - re-pull every source and rebuild the store.
pub async fn refresh(State(state): State<AppState>) -> Json<RefreshResponse> {
    let registry = state.registry();
    match registry.store().reload().await {
        Ok(report) => Json(RefreshResponse {
            status: report.status().to_string(),
            report: Some(report),
        }),
        Err(e) => {
            warn!(error = %e, "Refresh failed");
            Json(RefreshResponse {
                status: format!("Error refreshing data: {}", e),
                report: None,
            })
        }
    }
}

/// GET /config - the active source catalog.
pub async fn get_config(State(state): State<AppState>) -> Json<Vec<SourceEntry>> {
    Json(state.registry().entries().to_vec())
}

/// POST /api/config - validate, persist and activate a new catalog.
pub async fn save_config(State(state): State<AppState>, body: Bytes) -> Json<ConfigUpdateResponse> {
    match apply_catalog(&state, &body) {
        Ok(sources) => {
            info!(sources, "Source catalog replaced");
            Json(ConfigUpdateResponse {
                status: "success".to_string(),
                message: None,
            })
        }
        Err(message) => {
            warn!(error = %message, "Rejected catalog update");
            Json(ConfigUpdateResponse {
                status: "error".to_string(),
                message: Some(message),
            })
        }
    }
}

/// Parse and build the new registry before touching disk, so a bad catalog
/// leaves both the file and the running registry unchanged.
fn apply_catalog(state: &AppState, body: &[u8]) -> Result<usize, String> {
    let entries: Vec<SourceEntry> =
        serde_json::from_slice(body).map_err(|e| format!("Invalid catalog: {}", e))?;
    let registry = SourceRegistry::build(entries, &state.config.fetch, &state.config.store)
        .map_err(|e| e.to_string())?;
    save_catalog(&state.catalog_path, registry.entries()).map_err(|e| e.to_string())?;

    let sources = registry.len();
    state.replace_registry(registry);
    Ok(sources)
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound("no such endpoint".to_string())
}
