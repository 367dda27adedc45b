//! Error types for chat orchestration.

use datadesk_core::error::DatadeskError;

/// Errors from the chat engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("routing failed: {0}")]
    RoutingFailed(String),
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("memory error: {0}")]
    Memory(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DatadeskError> for ChatError {
    fn from(err: DatadeskError) -> Self {
        match err {
            DatadeskError::Config(msg) => ChatError::Config(msg),
            DatadeskError::Llm(msg) => ChatError::Llm(msg),
            other => ChatError::Storage(other.to_string()),
        }
    }
}

impl From<ChatError> for DatadeskError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Config(msg) => DatadeskError::Config(msg),
            ChatError::Llm(msg) => DatadeskError::Llm(msg),
            other => DatadeskError::Api(other.to_string()),
        }
    }
}
