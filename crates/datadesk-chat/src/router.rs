//! Table routing: one model call that picks the sources relevant to a
//! question before the agent runs.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ChatError;
use crate::llm::LlmClient;
use crate::registry::SourceRegistry;
use crate::types::ChatMessage;

const ROUTER_PROMPT: &str = "You are a Database Router. Select relevant tables from the list. \
Return ONLY comma-separated names. IF NO TABLE IS RELEVANT (e.g., query is about general \
knowledge, manuals, technical specs not in DB), RETURN 'None'. If the query is a simple \
greeting or a conversational follow-up about the chat history (e.g., 'hi', 'what did I ask', \
'repeat that'), RETURN 'General'.";

/// Outcome of routing a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Nothing in the database can answer this.
    None,
    /// Small talk or a question about the conversation itself.
    General,
    /// Names of the selected sources, as the model wrote them.
    Tables(Vec<String>),
}

/// Parse the router's comma-separated answer.
pub fn parse_route(answer: &str) -> RouteDecision {
    let names: Vec<String> = answer
        .split([',', '\n'])
        .map(|n| {
            n.trim()
                .trim_start_matches('-')
                .trim()
                .trim_matches(|c| c == '\'' || c == '"' || c == '`' || c == '.')
                .to_string()
        })
        .filter(|n| !n.is_empty())
        .collect();

    match names.as_slice() {
        [] => RouteDecision::None,
        [only] if only.to_lowercase().contains("none") => RouteDecision::None,
        [only] if only.to_lowercase().contains("general") => RouteDecision::General,
        _ => RouteDecision::Tables(names),
    }
}

pub struct TableRouter {
    llm: Arc<dyn LlmClient>,
}

impl TableRouter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Ask the model which sources `query` needs.
    pub async fn route(
        &self,
        query: &str,
        registry: &SourceRegistry,
    ) -> Result<RouteDecision, ChatError> {
        let messages = vec![
            ChatMessage::system(ROUTER_PROMPT),
            ChatMessage::user(format!(
                "Available Tables:\n{}\n\nQuery: {}",
                registry.menu(),
                query
            )),
        ];

        let completion = self.llm.complete(&messages, &[]).await.map_err(|e| {
            warn!(error = %e, "Routing call failed");
            ChatError::RoutingFailed(e.to_string())
        })?;

        let decision = parse_route(completion.text_or_empty());
        debug!(?decision, "Routed query");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use datadesk_core::config::StoreConfig;

    #[test]
    fn test_parse_none_and_general() {
        assert_eq!(parse_route(""), RouteDecision::None);
        assert_eq!(parse_route("None"), RouteDecision::None);
        assert_eq!(parse_route("'none'."), RouteDecision::None);
        assert_eq!(parse_route("General"), RouteDecision::General);
        assert_eq!(parse_route(" general "), RouteDecision::General);
    }

    #[test]
    fn test_parse_table_list() {
        assert_eq!(
            parse_route("Equipment, Spare Parts"),
            RouteDecision::Tables(vec!["Equipment".into(), "Spare Parts".into()])
        );
        assert_eq!(
            parse_route("- Equipment\n- Work Orders"),
            RouteDecision::Tables(vec!["Equipment".into(), "Work Orders".into()])
        );
        assert_eq!(
            parse_route("Equipment"),
            RouteDecision::Tables(vec!["Equipment".into()])
        );
    }

    #[tokio::test]
    async fn test_route_sends_menu_and_query() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_text("Equipment");
        let router = TableRouter::new(llm.clone());
        let registry = SourceRegistry::empty(&StoreConfig::default());

        let decision = router.route("which presses run?", &registry).await.unwrap();
        assert_eq!(decision, RouteDecision::Tables(vec!["Equipment".into()]));

        let request = &llm.requests()[0];
        assert!(request.messages[0].content.starts_with("You are a Database Router"));
        assert!(request.messages[1].content.ends_with("Query: which presses run?"));
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn test_route_failure() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_error("rate limited");
        let router = TableRouter::new(llm);
        let registry = SourceRegistry::empty(&StoreConfig::default());

        let err = router.route("q", &registry).await.unwrap_err();
        assert!(matches!(err, ChatError::RoutingFailed(_)));
    }
}
