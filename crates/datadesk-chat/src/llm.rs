//! Language model clients.
//!
//! `LlmClient` is the seam every chat component talks to. The production
//! implementation speaks the chat-completions protocol shared by OpenAI,
//! Azure OpenAI and Ollama; `ScriptedLlm` replays canned completions in tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use datadesk_core::config::{LlmConfig, LlmProvider};

use crate::error::ChatError;
use crate::types::{ChatMessage, Completion, Role, ToolCall, ToolSpec};

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Identifier of the backing model, for logs.
    fn model(&self) -> &str;

    /// One completion over `messages`, optionally offering `tools`.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Completion, ChatError>;
}

// =============================================================================
// Chat-completions client
// =============================================================================

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompatibleClient {
    client: Client,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleClient {
    /// Build from configuration, reading the API key from `api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: Option<String>) -> Result<Self, ChatError> {
        let base = config.effective_base_url().ok_or_else(|| {
            ChatError::Config(format!(
                "llm.base_url is required for provider '{}'",
                config.provider.as_str()
            ))
        })?;
        let base = base.trim_end_matches('/');

        let endpoint = match config.provider {
            LlmProvider::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                base, config.model, config.api_version
            ),
            LlmProvider::OpenAi | LlmProvider::Ollama => format!("{}/chat/completions", base),
        };

        if api_key.is_none() && config.provider.requires_api_key() {
            warn!(
                provider = config.provider.as_str(),
                env = %config.api_key_env,
                "No API key configured, model calls will likely be rejected"
            );
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            provider: config.provider,
            endpoint,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(tool_to_wire).collect());
        }
        body
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Completion, ChatError> {
        let body = self.request_body(messages, tools);
        debug!(
            provider = self.provider.as_str(),
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "LLM request"
        );

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = match self.provider {
                LlmProvider::Azure => request.header("api-key", key),
                LlmProvider::OpenAi | LlmProvider::Ollama => {
                    request.header("Authorization", format!("Bearer {}", key))
                }
            };
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Llm(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let msg =
                extract_api_error(&body).unwrap_or_else(|| format!("HTTP {}: {}", status, body));
            return Err(ChatError::Llm(msg));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Llm(format!("invalid response body: {}", e)))?;
        parse_completion(&payload)
    }
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

fn message_to_wire(message: &ChatMessage) -> Value {
    match message.role {
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    // Unparseable arguments were kept as the raw string; echo it verbatim.
                    let arguments = match &call.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": arguments,
                        }
                    })
                })
                .collect();
            let content = if message.content.is_empty() {
                Value::Null
            } else {
                Value::String(message.content.clone())
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        role => json!({"role": role, "content": message.content}),
    }
}

fn tool_to_wire(tool: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Read the first choice of a chat-completions response.
pub fn parse_completion(payload: &Value) -> Result<Completion, ChatError> {
    let message = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ChatError::Llm("response has no choices".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(String::from);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(idx, call)| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let raw = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}");
                    let arguments = serde_json::from_str(raw)
                        .unwrap_or_else(|_| Value::String(raw.to_string()));
                    let id = call
                        .get("id")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| format!("call_{}", idx));
                    Some(ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Completion {
        content,
        tool_calls,
    })
}

fn extract_api_error(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed["error"]["message"].as_str().map(|s| s.to_string())
}

// =============================================================================
// ScriptedLlm
// =============================================================================

/// A request seen by `ScriptedLlm`.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// Test double that replays queued completions in order and records every
/// request. An exhausted script answers with an error.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<Completion, String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, completion: Completion) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(completion));
        }
        self
    }

    pub fn push_text(&self, text: &str) -> &Self {
        self.push(Completion::text(text))
    }

    pub fn push_tool_call(&self, name: &str, arguments: Value) -> &Self {
        let id = format!("call_{}", self.pending() + self.requests().len());
        self.push(Completion::calls(vec![ToolCall {
            id,
            name: name.to_string(),
            arguments,
        }]))
    }

    pub fn push_error(&self, message: &str) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(message.to_string()));
        }
        self
    }

    /// Completions not yet consumed.
    pub fn pending(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<Completion, ChatError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }
        let next = self
            .script
            .lock()
            .map_err(|e| ChatError::Llm(format!("script lock poisoned: {}", e)))?
            .pop_front();
        match next {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(message)) => Err(ChatError::Llm(message)),
            None => Err(ChatError::Llm("script exhausted".to_string())),
        }
    }
}
