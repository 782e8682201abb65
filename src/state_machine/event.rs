//! Events that can occur in a conversation

use crate::db::{ErrorKind, ToolResult};
use crate::llm::{ContentBlock, Usage};
use crate::state_machine::state::ToolCall;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage {
        text: String,
    },

    // LLM events
    LlmResponse {
        content: Vec<ContentBlock>,
        /// Tool calls extracted from the content
        tool_calls: Vec<ToolCall>,
        usage: Usage,
    },
    LlmError {
        message: String,
        error_kind: ErrorKind,
    },

    // Tool events
    ToolComplete {
        tool_use_id: String,
        result: ToolResult,
    },
}
