//! Chat orchestrator: one user turn from question to remembered answer.
//!
//! memory search -> session context -> table routing -> agent -> memory write.

use std::sync::Arc;

use tracing::{info, warn};

use datadesk_core::config::{LlmConfig, MemoryConfig};
use datadesk_storage::{MemoryStore, ROLE_INTERACTION};

use crate::agent::SqlAgent;
use crate::context::ContextBuilder;
use crate::error::ChatError;
use crate::llm::LlmClient;
use crate::prompt::agent_system_prompt;
use crate::registry::SourceRegistry;
use crate::router::{RouteDecision, TableRouter};
use crate::tools::ToolBox;
use crate::types::{ChatReply, ChatRequest};

pub const NO_DATA_REPLY: &str =
    "No relevant data found in the database. This query might be better suited for the Manuals/RAG.";
pub const ROUTING_ERROR_REPLY: &str = "Error in routing.";

pub struct ChatOrchestrator {
    memory: MemoryStore,
    context: ContextBuilder,
    router: TableRouter,
    agent: SqlAgent,
}

impl ChatOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        memory: MemoryStore,
        llm_config: &LlmConfig,
        memory_config: &MemoryConfig,
    ) -> Self {
        Self {
            context: ContextBuilder::new(
                Arc::clone(&llm),
                memory.clone(),
                memory_config.window_size,
                memory_config.search_limit,
            ),
            router: TableRouter::new(Arc::clone(&llm)),
            agent: SqlAgent::new(llm, llm_config.max_iterations),
            memory,
        }
    }

    /// Answer one chat turn against `registry`.
    ///
    /// Routing outcomes that end the turn early are returned as replies.
    /// Errors are reserved for invalid requests and agent model failures.
    pub async fn run(
        &self,
        registry: &SourceRegistry,
        request: &ChatRequest,
    ) -> Result<ChatReply, ChatError> {
        let query = request.message.trim();
        if query.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        info!(
            session = %request.session_id,
            language = %request.language,
            "User query"
        );

        let facts = self.context.semantic_facts(&request.session_id, query);
        let session = self.context.build(request).await;

        let tools = match self.router.route(query, registry).await {
            Ok(RouteDecision::None) => {
                info!("No relevant tables, query is likely for the manuals");
                return Ok(ChatReply::text(NO_DATA_REPLY));
            }
            Ok(RouteDecision::General) => {
                info!("General query, proceeding without specific tables");
                ToolBox::sql_only(registry)
            }
            Ok(RouteDecision::Tables(names)) => {
                info!(tables = ?names, "Selected tables");
                ToolBox::new(registry, &names)
            }
            Err(e) => {
                warn!(error = %e, "Routing error");
                return Ok(ChatReply::text(ROUTING_ERROR_REPLY));
            }
        };

        let prompt = agent_system_prompt(&request.language, &session.summary, &facts);
        let outcome = self.agent.run(prompt, session.history, query, &tools).await?;
        let sql_log = outcome.sql_log();

        let mut content = format!("User: {}\nAssistant: {}", query, outcome.output);
        if !sql_log.is_empty() {
            content.push_str("\nDETAILS:");
            content.push_str(&sql_log);
        }
        if let Err(e) = self
            .memory
            .add(&request.session_id, &content, ROLE_INTERACTION)
        {
            warn!(session = %request.session_id, error = %e, "Memory update failed");
        }

        Ok(ChatReply {
            response: outcome.output,
            sql_log: (!sql_log.is_empty()).then_some(sql_log),
        })
    }

    /// Stored interactions of a session, oldest first.
    pub fn history(&self, session_id: &str) -> Result<Vec<String>, ChatError> {
        let entries = self
            .memory
            .get_all(session_id)
            .map_err(|e| ChatError::Memory(e.to_string()))?;
        Ok(entries.into_iter().map(|e| e.content).collect())
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }
}
