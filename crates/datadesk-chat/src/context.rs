//! Conversation context for a chat turn.
//!
//! Either the caller supplies the recent history, or it is rebuilt from the
//! session's memories: the newest `window_size` interactions are replayed as
//! messages and everything older is condensed into one summary.

use std::sync::Arc;

use tracing::{debug, warn};

use datadesk_storage::MemoryStore;

use crate::error::ChatError;
use crate::llm::LlmClient;
use crate::types::{ChatMessage, ChatRequest, HistoryItem};

pub const NO_PREVIOUS_CONTEXT: &str = "No previous context.";
pub const HISTORY_PROVIDED: &str = "Refer to the chat history for context.";
pub const CONTEXT_ERROR: &str = "Error loading context.";
pub const NO_FACTS: &str = "No relevant facts found.";
pub const MEMORY_UNAVAILABLE: &str = "Memory Unavailable";

/// Summary of older turns plus replayable recent messages.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub summary: String,
    pub history: Vec<ChatMessage>,
}

/// Convert caller-held history. Roles other than user/assistant are dropped.
pub fn history_to_messages(items: &[HistoryItem]) -> Vec<ChatMessage> {
    items
        .iter()
        .filter_map(|item| match item.role.as_str() {
            "user" => Some(ChatMessage::user(item.content.clone())),
            "ai" | "assistant" => Some(ChatMessage::assistant(item.content.clone())),
            _ => None,
        })
        .collect()
}

/// Split a stored `User: ..\nAssistant: ..` interaction into two messages.
/// Anything else is replayed as a single user message.
pub fn split_interaction(text: &str) -> Vec<ChatMessage> {
    if text.contains("User:") && text.contains("Assistant:") {
        let mut parts = text.split("Assistant:");
        let user = parts.next().unwrap_or("").replace("User:", "");
        let assistant = parts.next().unwrap_or("");
        vec![
            ChatMessage::user(user.trim()),
            ChatMessage::assistant(assistant.trim()),
        ]
    } else {
        vec![ChatMessage::user(text)]
    }
}

pub struct ContextBuilder {
    llm: Arc<dyn LlmClient>,
    memory: MemoryStore,
    window_size: usize,
    search_limit: usize,
}

impl ContextBuilder {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        memory: MemoryStore,
        window_size: usize,
        search_limit: usize,
    ) -> Self {
        Self {
            llm,
            memory,
            window_size,
            search_limit,
        }
    }

    /// Context for `request`: its own history when given, else session memory.
    pub async fn build(&self, request: &ChatRequest) -> SessionContext {
        let history = request.history();
        if !history.is_empty() {
            debug!(messages = history.len(), "Using provided history");
            return SessionContext {
                summary: HISTORY_PROVIDED.to_string(),
                history: history_to_messages(history),
            };
        }

        match self.from_memory(&request.session_id).await {
            Ok(context) => context,
            Err(e) => {
                warn!(session = %request.session_id, error = %e, "Context load failed");
                SessionContext {
                    summary: CONTEXT_ERROR.to_string(),
                    history: Vec::new(),
                }
            }
        }
    }

    /// Rebuild context from stored memories, summarizing older ones.
    pub async fn from_memory(&self, session_id: &str) -> Result<SessionContext, ChatError> {
        let texts: Vec<String> = self
            .memory
            .get_all(session_id)
            .map_err(|e| ChatError::Memory(e.to_string()))?
            .into_iter()
            .map(|entry| entry.content)
            .collect();

        let split_at = texts.len().saturating_sub(self.window_size);
        let (older, recent) = texts.split_at(split_at);

        let summary = if older.is_empty() {
            NO_PREVIOUS_CONTEXT.to_string()
        } else {
            debug!(session = %session_id, older = older.len(), "Summarizing older messages");
            self.summarize(older).await?
        };

        Ok(SessionContext {
            summary,
            history: recent.iter().flat_map(|t| split_interaction(t)).collect(),
        })
    }

    /// Memories related to `query`, one per line.
    pub fn semantic_facts(&self, session_id: &str, query: &str) -> String {
        match self.memory.search(session_id, query, self.search_limit) {
            Ok(hits) if hits.is_empty() => NO_FACTS.to_string(),
            Ok(hits) => hits
                .into_iter()
                .map(|h| h.content)
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                warn!(session = %session_id, error = %e, "Memory search failed");
                MEMORY_UNAVAILABLE.to_string()
            }
        }
    }

    async fn summarize(&self, older: &[String]) -> Result<String, ChatError> {
        let prompt = format!(
            "Summarize the following previous conversation history concisely. \
             Focus on the entities discussed, specific constraints applied, and the user's goal.\n\n\
             HISTORY:\n{}",
            older.join("\n")
        );
        let completion = self.llm.complete(&[ChatMessage::user(prompt)], &[]).await?;
        Ok(completion.text_or_empty().to_string())
    }
}
