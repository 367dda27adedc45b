//! Application state shared across all route handlers.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use datadesk_chat::{ChatOrchestrator, SourceRegistry};
use datadesk_core::DatadeskConfig;

/// Shared application state.
///
/// The source registry sits behind a swappable `Arc`: a catalog update
/// replaces it wholesale while in-flight requests keep the one they cloned.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DatadeskConfig>,
    /// Where `POST /api/config` persists the catalog.
    pub catalog_path: PathBuf,
    pub chat: Arc<ChatOrchestrator>,
    registry: Arc<RwLock<Arc<SourceRegistry>>>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: DatadeskConfig,
        catalog_path: PathBuf,
        registry: SourceRegistry,
        chat: ChatOrchestrator,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog_path,
            chat: Arc::new(chat),
            registry: Arc::new(RwLock::new(Arc::new(registry))),
            start_time: Instant::now(),
        }
    }

    /// The registry current at the time of the call.
    pub fn registry(&self) -> Arc<SourceRegistry> {
        match self.registry.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Install `registry`, returning the one it replaced.
    pub fn replace_registry(&self, registry: SourceRegistry) -> Arc<SourceRegistry> {
        let next = Arc::new(registry);
        match self.registry.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        }
    }
}
