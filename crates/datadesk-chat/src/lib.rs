//! Conversational layer for Datadesk.
//!
//! Routes a question to the relevant sources, runs a tool-calling SQL agent
//! over the federated store, and keeps per-session memory.

pub mod agent;
pub mod context;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod router;
pub mod tools;
pub mod types;

pub use agent::{AgentOutcome, SqlAgent};
pub use context::{ContextBuilder, SessionContext};
pub use error::ChatError;
pub use llm::{LlmClient, OpenAiCompatibleClient, ScriptedLlm};
pub use orchestrator::{ChatOrchestrator, NO_DATA_REPLY, ROUTING_ERROR_REPLY};
pub use registry::SourceRegistry;
pub use router::{parse_route, RouteDecision, TableRouter};
pub use tools::{ToolBox, ToolOutput, DESCRIBE_PREFIX, SQL_TOOL};
pub use types::{ChatMessage, ChatReply, ChatRequest, Completion, HistoryItem, Role, ToolCall, ToolSpec};
