//! Conversation state types

use crate::db::ErrorKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Tool Input Types - Strongly typed inputs for each tool
// ============================================================================

/// Input for the calculator tool
///
/// `operation` stays a string so that an unsupported operation reaches the
/// tool and comes back as a structured error instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculatorInput {
    pub first_num: f64,
    pub second_num: f64,
    pub operation: String,
}

/// Input for the `get_stock_price` tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPriceInput {
    pub symbol: String,
}

/// Input for the `web_search` tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchInput {
    pub query: String,
}

/// Input for the `rag_tool` tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSearchInput {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// Strongly typed tool input enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tool", rename_all = "snake_case")]
pub enum ToolInput {
    Calculator(CalculatorInput),
    StockPrice(StockPriceInput),
    WebSearch(WebSearchInput),
    DocumentSearch(DocumentSearchInput),
    /// Fallback for unknown tools or parsing failures
    Unknown {
        name: String,
        input: Value,
    },
}

impl ToolInput {
    /// Get the tool name
    pub fn tool_name(&self) -> &str {
        match self {
            ToolInput::Calculator(_) => "calculator",
            ToolInput::StockPrice(_) => "get_stock_price",
            ToolInput::WebSearch(_) => "web_search",
            ToolInput::DocumentSearch(_) => "rag_tool",
            ToolInput::Unknown { name, .. } => name,
        }
    }

    /// Convert to JSON Value for tool execution
    pub fn to_value(&self) -> Value {
        match self {
            ToolInput::Calculator(input) => serde_json::to_value(input).unwrap_or(Value::Null),
            ToolInput::StockPrice(input) => serde_json::to_value(input).unwrap_or(Value::Null),
            ToolInput::WebSearch(input) => serde_json::to_value(input).unwrap_or(Value::Null),
            ToolInput::DocumentSearch(input) => serde_json::to_value(input).unwrap_or(Value::Null),
            ToolInput::Unknown { input, .. } => input.clone(),
        }
    }

    /// Parse from tool name and JSON value
    pub fn from_name_and_value(name: &str, value: Value) -> Self {
        match name {
            "calculator" => parse_or_unknown(name, value, ToolInput::Calculator),
            "get_stock_price" => parse_or_unknown(name, value, ToolInput::StockPrice),
            "web_search" => parse_or_unknown(name, value, ToolInput::WebSearch),
            "rag_tool" => parse_or_unknown(name, value, ToolInput::DocumentSearch),
            _ => ToolInput::Unknown {
                name: name.to_string(),
                input: value,
            },
        }
    }
}

fn parse_or_unknown<T: DeserializeOwned>(
    name: &str,
    value: Value,
    wrap: fn(T) -> ToolInput,
) -> ToolInput {
    serde_json::from_value(value.clone()).map_or_else(
        |_| ToolInput::Unknown {
            name: name.to_string(),
            input: value,
        },
        wrap,
    )
}

// ============================================================================
// Tool Call - A tool invocation with ID and typed input
// ============================================================================

/// A tool call from the LLM with typed input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub input: ToolInput,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, input: ToolInput) -> Self {
        Self {
            id: id.into(),
            input,
        }
    }

    /// Get the tool name
    pub fn name(&self) -> &str {
        self.input.tool_name()
    }
}

// ============================================================================
// Conversation State
// ============================================================================

/// Conversation state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Ready for user input, no pending operations
    #[default]
    Idle,

    /// LLM request in flight
    Reasoning {
        /// Tool rounds already completed in this turn
        #[serde(default)]
        round: u32,
    },

    /// Executing tools serially, in the order the model requested them
    ExecutingTool {
        round: u32,
        /// The current tool being executed
        current_tool: ToolCall,
        /// Remaining tools to execute after current completes
        remaining_tools: Vec<ToolCall>,
    },

    /// Error occurred - UI displays this state directly
    Error {
        message: String,
        error_kind: ErrorKind,
    },
}

impl ConvState {
    /// Check if agent is currently working
    pub fn is_working(&self) -> bool {
        !matches!(self, ConvState::Idle | ConvState::Error { .. })
    }
}

/// Default bound on reason/execute-tool rounds per user turn
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 25;

/// Context for a conversation (immutable configuration)
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub thread_id: String,
    pub model_id: String,
    /// `None` leaves the cycle unbounded
    pub max_tool_rounds: Option<u32>,
}

impl ConvContext {
    pub fn new(thread_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            model_id: model_id.into(),
            max_tool_rounds: Some(DEFAULT_MAX_TOOL_ROUNDS),
        }
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: Option<u32>) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Whether another tool round is allowed after `round` completed rounds
    pub fn allows_tool_round(&self, round: u32) -> bool {
        self.max_tool_rounds.map_or(true, |max| round < max)
    }
}
