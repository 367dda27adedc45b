//! End-to-end chat turns over a mock HTTP source with a scripted model,
//! plus the chat-completions client against a mock model endpoint.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use datadesk_chat::{
    ChatError, ChatMessage, ChatOrchestrator, ChatRequest, LlmClient, OpenAiCompatibleClient,
    Role, ScriptedLlm, SourceRegistry, ToolSpec, NO_DATA_REPLY, ROUTING_ERROR_REPLY,
};
use datadesk_core::config::{FetchConfig, LlmConfig, LlmProvider, MemoryConfig, StoreConfig};
use datadesk_core::SourceEntry;
use datadesk_storage::MemoryStore;

// =============================================================================
// Helpers
// =============================================================================

async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn equipment_registry() -> SourceRegistry {
    async fn equip() -> Json<Value> {
        Json(json!({"data": [{"id": 1, "name": "Press A"}, {"id": 2, "name": "Press B"}]}))
    }
    let base = spawn_server(Router::new().route("/equip", post(equip))).await;
    let entries: Vec<SourceEntry> = serde_json::from_value(json!([{
        "name": "Equipment", "pk": "id", "description": "Machines on the shop floor",
        "api_url": format!("{}/equip", base), "json_key": "data", "payload": {}
    }]))
    .unwrap();
    SourceRegistry::build(entries, &FetchConfig::default(), &StoreConfig::default()).unwrap()
}

fn orchestrator(llm: Arc<ScriptedLlm>, memory: MemoryStore) -> ChatOrchestrator {
    ChatOrchestrator::new(llm, memory, &LlmConfig::default(), &MemoryConfig::default())
}

// =============================================================================
// Orchestration
// =============================================================================

#[tokio::test]
async fn test_equipment_question_end_to_end() {
    let registry = equipment_registry().await;
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("Equipment")
        .push_tool_call("describe_equipment", json!({}))
        .push_tool_call(
            "execute_global_sql",
            json!({"query": "SELECT name FROM equipment WHERE id=1"}),
        )
        .push_text("Machine 1 is Press A.");
    let memory = MemoryStore::in_memory().unwrap();
    let chat = orchestrator(llm.clone(), memory.clone());

    let reply = chat
        .run(&registry, &ChatRequest::new("What is machine 1 called?", "s1"))
        .await
        .unwrap();

    assert_eq!(reply.response, "Machine 1 is Press A.");
    assert_eq!(
        reply.sql_log.as_deref(),
        Some("\n[SQL EXECUTED]: SELECT name FROM equipment WHERE id=1\n[RESULT]: [{\"name\":\"Press A\"}]...")
    );

    let requests = llm.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[1].tools, vec!["execute_global_sql", "describe_equipment"]);

    let describe_result = requests[2].messages.last().unwrap();
    assert_eq!(describe_result.role, Role::Tool);
    assert!(describe_result.content.starts_with("TABLE: equipment"));

    let history = chat.history("s1").unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].starts_with("User: What is machine 1 called?\nAssistant: Machine 1 is Press A.\nDETAILS:\n[SQL EXECUTED]"));
}

#[tokio::test]
async fn test_no_relevant_table() {
    let registry = equipment_registry().await;
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("None");
    let chat = orchestrator(llm.clone(), MemoryStore::in_memory().unwrap());

    let reply = chat
        .run(&registry, &ChatRequest::new("How do I service the hydraulic pump?", "s"))
        .await
        .unwrap();
    assert_eq!(reply.response, NO_DATA_REPLY);
    assert!(reply.sql_log.is_none());
    assert_eq!(llm.requests().len(), 1);
    assert!(chat.history("s").unwrap().is_empty());
}

#[tokio::test]
async fn test_routing_failure() {
    let registry = equipment_registry().await;
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_error("model unavailable");
    let chat = orchestrator(llm, MemoryStore::in_memory().unwrap());

    let reply = chat
        .run(&registry, &ChatRequest::new("list presses", "s"))
        .await
        .unwrap();
    assert_eq!(reply.response, ROUTING_ERROR_REPLY);
}

#[tokio::test]
async fn test_general_query_offers_only_sql_tool() {
    let registry = equipment_registry().await;
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("General").push_text("Hello! Ask me about your equipment.");
    let chat = orchestrator(llm.clone(), MemoryStore::in_memory().unwrap());

    let reply = chat.run(&registry, &ChatRequest::new("hi", "s")).await.unwrap();
    assert_eq!(reply.response, "Hello! Ask me about your equipment.");
    assert!(reply.sql_log.is_none());
    assert_eq!(llm.requests()[1].tools, vec!["execute_global_sql"]);
    assert_eq!(chat.history("s").unwrap(), vec!["User: hi\nAssistant: Hello! Ask me about your equipment."]);
}

#[tokio::test]
async fn test_previous_turns_are_replayed() {
    let registry = equipment_registry().await;
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("General").push_text("first answer");
    llm.push_text("General").push_text("second answer");
    let chat = orchestrator(llm.clone(), MemoryStore::in_memory().unwrap());

    chat.run(&registry, &ChatRequest::new("first question", "s")).await.unwrap();
    chat.run(&registry, &ChatRequest::new("second question", "s")).await.unwrap();

    let agent_request = &llm.requests()[3];
    let system = &agent_request.messages[0].content;
    assert!(system.contains("OLDER CONVERSATION SUMMARY: No previous context."));
    assert!(system.contains("SPECIFIC RELEVANT FACTS: User: first question"));
    assert_eq!(agent_request.messages[1], ChatMessage::user("first question"));
    assert_eq!(agent_request.messages[2], ChatMessage::assistant("first answer"));
    assert_eq!(agent_request.messages[3], ChatMessage::user("second question"));
}

#[tokio::test]
async fn test_iteration_limit() {
    let registry = equipment_registry().await;
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("Equipment");
    for _ in 0..3 {
        llm.push_tool_call("execute_global_sql", json!({"query": "SELECT 1"}));
    }
    let config = LlmConfig {
        max_iterations: 2,
        ..LlmConfig::default()
    };
    let chat = ChatOrchestrator::new(
        llm.clone(),
        MemoryStore::in_memory().unwrap(),
        &config,
        &MemoryConfig::default(),
    );

    let reply = chat.run(&registry, &ChatRequest::new("loop", "s")).await.unwrap();
    assert_eq!(reply.response, "Agent stopped due to iteration limit or time limit.");
    assert_eq!(llm.pending(), 1);
    assert_eq!(reply.sql_log.unwrap().matches("[SQL EXECUTED]").count(), 2);
}

#[tokio::test]
async fn test_agent_model_failure_is_an_error() {
    let registry = equipment_registry().await;
    let llm = Arc::new(ScriptedLlm::new());
    llm.push_text("Equipment").push_error("context length exceeded");
    let chat = orchestrator(llm, MemoryStore::in_memory().unwrap());

    let err = chat.run(&registry, &ChatRequest::new("q", "s")).await.unwrap_err();
    assert!(matches!(err, ChatError::Llm(_)));
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let registry = SourceRegistry::empty(&StoreConfig::default());
    let chat = orchestrator(Arc::new(ScriptedLlm::new()), MemoryStore::in_memory().unwrap());
    let err = chat.run(&registry, &ChatRequest::new("   ", "s")).await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));
}

// =============================================================================
// Chat-completions client
// =============================================================================

#[derive(Clone, Default)]
struct Captured {
    auth: Arc<Mutex<Option<String>>>,
    body: Arc<Mutex<Option<Value>>>,
}

async fn completions(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    *captured.auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *captured.body.lock().unwrap() = Some(body);
    Json(json!({"choices": [{"message": {
        "role": "assistant",
        "content": null,
        "tool_calls": [{"id": "call_9", "type": "function",
            "function": {"name": "execute_global_sql", "arguments": "{\"query\":\"SELECT 1\"}"}}]
    }}]}))
}

#[tokio::test]
async fn test_openai_client_round_trip() {
    let captured = Captured::default();
    let router = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(captured.clone());
    let base = spawn_server(router).await;

    let config = LlmConfig {
        provider: LlmProvider::OpenAi,
        base_url: Some(format!("{}/v1", base)),
        ..LlmConfig::default()
    };
    let client = OpenAiCompatibleClient::with_api_key(&config, Some("sk-test".into())).unwrap();
    let tools = vec![ToolSpec {
        name: "execute_global_sql".into(),
        description: "sql".into(),
        parameters: json!({"type": "object"}),
    }];

    let completion = client
        .complete(&[ChatMessage::user("hello")], &tools)
        .await
        .unwrap();
    assert_eq!(completion.tool_calls[0].id, "call_9");
    assert_eq!(completion.tool_calls[0].arguments, json!({"query": "SELECT 1"}));

    assert_eq!(captured.auth.lock().unwrap().as_deref(), Some("Bearer sk-test"));
    let body = captured.body.lock().unwrap().clone().unwrap();
    assert_eq!(body["messages"][0], json!({"role": "user", "content": "hello"}));
    assert_eq!(body["tools"][0]["type"], "function");
}

#[tokio::test]
async fn test_openai_client_surfaces_api_errors() {
    async fn reject() -> (axum::http::StatusCode, Json<Value>) {
        (
            axum::http::StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Invalid API key"}})),
        )
    }
    let base = spawn_server(Router::new().route("/v1/chat/completions", post(reject))).await;
    let config = LlmConfig {
        base_url: Some(format!("{}/v1", base)),
        ..LlmConfig::default()
    };
    let client = OpenAiCompatibleClient::with_api_key(&config, None).unwrap();

    let err = client.complete(&[ChatMessage::user("x")], &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "LLM error: Invalid API key");
}
