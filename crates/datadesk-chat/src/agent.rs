//! Tool-calling agent loop.
//!
//! The model is called with the conversation and the available tools until
//! it answers in text or the iteration budget runs out. Every tool call is
//! executed and fed back as a tool message.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::llm::LlmClient;
use crate::tools::{ToolBox, ToolOutput, SQL_TOOL};
use crate::types::ChatMessage;

pub const ITERATION_LIMIT_MESSAGE: &str = "Agent stopped due to iteration limit or time limit.";

/// Characters of each SQL result kept in the SQL log.
const SQL_LOG_RESULT_CHARS: usize = 500;

/// Final answer plus every tool call made on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub output: String,
    pub steps: Vec<ToolOutput>,
}

impl AgentOutcome {
    /// Executed SQL statements and the head of their results.
    pub fn sql_log(&self) -> String {
        self.steps
            .iter()
            .filter(|step| step.tool == SQL_TOOL)
            .map(|step| {
                let head: String = step.output.chars().take(SQL_LOG_RESULT_CHARS).collect();
                format!("\n[SQL EXECUTED]: {}\n[RESULT]: {}...", step.input, head)
            })
            .collect()
    }
}

pub struct SqlAgent {
    llm: Arc<dyn LlmClient>,
    max_iterations: usize,
}

impl SqlAgent {
    pub fn new(llm: Arc<dyn LlmClient>, max_iterations: usize) -> Self {
        Self {
            llm,
            max_iterations,
        }
    }

    pub async fn run(
        &self,
        system_prompt: String,
        history: Vec<ChatMessage>,
        input: &str,
        tools: &ToolBox,
    ) -> Result<AgentOutcome, ChatError> {
        let specs = tools.specs();
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history);
        messages.push(ChatMessage::user(input));

        let mut steps = Vec::new();
        for iteration in 0..self.max_iterations {
            let completion = self.llm.complete(&messages, &specs).await?;

            if completion.tool_calls.is_empty() {
                info!(iterations = iteration + 1, tool_calls = steps.len(), "Agent finished");
                return Ok(AgentOutcome {
                    output: completion.content.unwrap_or_default(),
                    steps,
                });
            }

            messages.push(ChatMessage::assistant_tool_calls(
                completion.content.clone().unwrap_or_default(),
                completion.tool_calls.clone(),
            ));
            for call in &completion.tool_calls {
                debug!(tool = %call.name, "Invoking tool");
                let output = tools.invoke(call).await;
                messages.push(ChatMessage::tool_result(&call.id, output.output.clone()));
                steps.push(output);
            }
        }

        warn!(max_iterations = self.max_iterations, "Agent hit iteration limit");
        Ok(AgentOutcome {
            output: ITERATION_LIMIT_MESSAGE.to_string(),
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_log_format() {
        let outcome = AgentOutcome {
            output: "done".into(),
            steps: vec![
                ToolOutput {
                    tool: "describe_equipment".into(),
                    input: String::new(),
                    output: "TABLE: equipment".into(),
                },
                ToolOutput {
                    tool: SQL_TOOL.into(),
                    input: "SELECT 1".into(),
                    output: "[{\"1\":1}]".into(),
                },
            ],
        };
        assert_eq!(
            outcome.sql_log(),
            "\n[SQL EXECUTED]: SELECT 1\n[RESULT]: [{\"1\":1}]..."
        );
    }

    #[test]
    fn test_sql_log_truncates_results() {
        let outcome = AgentOutcome {
            output: String::new(),
            steps: vec![ToolOutput {
                tool: SQL_TOOL.into(),
                input: "SELECT *".into(),
                output: "é".repeat(800),
            }],
        };
        let log = outcome.sql_log();
        assert_eq!(log.matches('é').count(), 500);
        assert!(log.ends_with("..."));
    }

    #[test]
    fn test_empty_sql_log() {
        let outcome = AgentOutcome {
            output: "hi".into(),
            steps: Vec::new(),
        };
        assert_eq!(outcome.sql_log(), "");
    }
}
