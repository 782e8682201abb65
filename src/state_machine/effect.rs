//! Effects produced by state transitions

use crate::db::{MessageContent, ToolResult, UsageData};
use crate::state_machine::state::ToolCall;
use serde_json::Value;

/// Effects to be executed after state transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Append a message to the thread's log
    PersistMessage {
        content: MessageContent,
        usage_data: Option<UsageData>,
    },

    /// Append several tool results at once
    PersistToolResults { results: Vec<ToolResult> },

    /// Persist the new state and append a checkpoint
    PersistState,

    /// Make an LLM request with the full history
    RequestLlm,

    /// Execute a tool (spawns as background task)
    ExecuteTool { tool: ToolCall },

    /// Notify connected clients
    NotifyClient { event_type: String, data: Value },
}

impl Effect {
    pub fn persist_user_message(text: &str) -> Self {
        Effect::PersistMessage {
            content: MessageContent::user(text),
            usage_data: None,
        }
    }

    pub fn persist_agent_message(content: MessageContent, usage: Option<UsageData>) -> Self {
        Effect::PersistMessage {
            content,
            usage_data: usage,
        }
    }

    pub fn persist_tool_message(result: &ToolResult) -> Self {
        Effect::PersistMessage {
            content: MessageContent::tool(&result.tool_use_id, &result.output, result.is_error),
            usage_data: None,
        }
    }

    pub fn notify_agent_done() -> Self {
        Effect::NotifyClient {
            event_type: "agent_done".to_string(),
            data: Value::Null,
        }
    }

    pub fn notify_error(message: &str) -> Self {
        Effect::NotifyClient {
            event_type: "error".to_string(),
            data: serde_json::json!({ "message": message }),
        }
    }

    pub fn execute_tool(tool: ToolCall) -> Self {
        Effect::ExecuteTool { tool }
    }
}
