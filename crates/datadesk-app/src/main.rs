//! Datadesk application binary - composition root.
//!
//! 1. Load configuration from TOML and apply CLI/env overrides
//! 2. Load the source catalog and build the registry
//! 3. Open the session memory database
//! 4. Connect the language model client
//! 5. Optionally load every source, then serve the REST API

mod cli;

use std::sync::Arc;

use clap::Parser;

use datadesk_api::state::AppState;
use datadesk_chat::{ChatOrchestrator, OpenAiCompatibleClient, SourceRegistry};
use datadesk_core::catalog::load_catalog;
use datadesk_core::config::expand_home;
use datadesk_core::DatadeskConfig;
use datadesk_storage::{Database, MemoryStore};

use crate::cli::CliArgs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = DatadeskConfig::load_or_default(&config_file);
    config.general.port = args.resolve_port(config.general.port);
    if let Some(sources) = args.resolve_sources() {
        config.general.sources_file = sources;
    }
    if let Some(level) = &args.log_level {
        config.general.log_level = level.clone();
    }

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Datadesk v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Source catalog. A broken catalog starts the server empty so it can be
    // fixed through POST /api/config.
    let catalog_path = expand_home(&config.general.sources_file);
    let registry = match load_catalog(&catalog_path)
        .and_then(|entries| SourceRegistry::build(entries, &config.fetch, &config.store))
    {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(path = %catalog_path.display(), error = %e, "Source catalog rejected, starting with no sources");
            SourceRegistry::empty(&config.store)
        }
    };

    // Session memory.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("memory.db");
    let memory = MemoryStore::new(Arc::new(Database::new(&db_path)?));
    tracing::info!(path = %db_path.display(), "Session memory opened");

    // Language model.
    let llm = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
    tracing::info!(
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        "LLM client ready"
    );

    let chat = ChatOrchestrator::new(llm, memory, &config.llm, &config.memory);

    if args.refresh || config.store.refresh_on_start {
        match registry.store().refresh().await {
            Ok(report) => tracing::info!(
                generation = report.generation,
                tables = ?report.table_names(),
                failed = report.failed.len(),
                "Initial load finished"
            ),
            Err(e) => tracing::warn!(error = %e, "Initial load failed, tables will load on first query"),
        }
    }

    let state = AppState::new(config, catalog_path, registry, chat);
    datadesk_api::start_server(state).await?;

    Ok(())
}
