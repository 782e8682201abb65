//! Tools the model can call
//!
//! Tools are stateless singletons. Everything a call needs about the
//! conversation it runs in arrives through `ToolContext`.

mod calculator;
mod document_search;
mod stock_price;
mod web_search;

pub use calculator::CalculatorTool;
pub use document_search::DocumentSearchTool;
pub use stock_price::StockPriceTool;
pub use web_search::WebSearchTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::rag::DocumentRegistry;

/// Per-request timeout for tools that call third-party services
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_ALPHAVANTAGE_URL: &str = "https://www.alphavantage.co/query";
const DEFAULT_SEARCH_URL: &str = "https://lite.duckduckgo.com/lite/";

/// Endpoints and credentials for the networked tools
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub alphavantage_api_key: String,
    pub alphavantage_url: String,
    pub search_url: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            alphavantage_api_key: "demo".to_string(),
            alphavantage_url: DEFAULT_ALPHAVANTAGE_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
        }
    }
}

impl ToolConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let alphavantage_api_key = std::env::var("ALPHAVANTAGE_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| {
                tracing::warn!("ALPHAVANTAGE_API_KEY not set; stock quotes use the demo key");
                defaults.alphavantage_api_key.clone()
            });
        Self {
            alphavantage_api_key,
            ..defaults
        }
    }
}

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }

    /// Structured payload, serialized for the model
    pub fn json(success: bool, value: &Value) -> Self {
        Self {
            success,
            output: value.to_string(),
        }
    }
}

/// Conversation context for one tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    /// The thread this tool is executing within
    pub thread_id: String,

    documents: Arc<DocumentRegistry>,
}

impl ToolContext {
    pub fn new(thread_id: impl Into<String>, documents: Arc<DocumentRegistry>) -> Self {
        Self {
            thread_id: thread_id.into(),
            documents,
        }
    }

    /// Document indices, keyed by thread
    pub fn documents(&self) -> &DocumentRegistry {
        &self.documents
    }
}

/// Trait for tools that can be executed by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Failures are reported through `ToolOutput`, never by panicking
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// Collection of tools available to conversations
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Web search, stock quotes, calculator and document retrieval
    pub fn standard(client: &reqwest::Client, config: &ToolConfig) -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(WebSearchTool::new(client.clone(), &config.search_url)),
            Arc::new(StockPriceTool::new(
                client.clone(),
                &config.alphavantage_url,
                &config.alphavantage_api_key,
            )),
            Arc::new(CalculatorTool),
            Arc::new(DocumentSearchTool),
        ];
        Self { tools }
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.tools
            .iter()
            .map(|t| crate::llm::ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name; `None` if no tool has that name
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        for tool in &self.tools {
            if tool.name() == name {
                return Some(tool.run(input, ctx).await);
            }
        }
        None
    }
}
