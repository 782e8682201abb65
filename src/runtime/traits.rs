//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Message, MessageContent, UsageData};
use crate::llm::{LlmError, LlmRequest, LlmResponse};
use crate::state_machine::ConvState;
use crate::tools::{ToolContext, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Storage for thread messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to the thread
    async fn add_message(
        &self,
        thread_id: &str,
        content: &MessageContent,
        usage_data: Option<&UsageData>,
    ) -> Result<Message, String>;

    /// Append several messages, all or nothing
    async fn add_messages(
        &self,
        thread_id: &str,
        contents: &[MessageContent],
    ) -> Result<Vec<Message>, String>;

    /// Get all messages for a thread
    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, String>;
}

/// Storage for thread state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist the state and append a checkpoint
    async fn update_state(&self, thread_id: &str, state: &ConvState) -> Result<(), String>;
}

/// Client for making LLM requests
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a request, forwarding text deltas to `tokens`
    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        tokens: &mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Executor for tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name; `None` if the tool does not exist
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput>;

    /// Get tool definitions for LLM
    fn definitions(&self) -> Vec<crate::llm::ToolDefinition>;
}

/// Combined storage trait for convenience
pub trait Storage: MessageStore + StateStore {}
impl<T: MessageStore + StateStore> Storage for T {}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn add_message(
        &self,
        thread_id: &str,
        content: &MessageContent,
        usage_data: Option<&UsageData>,
    ) -> Result<Message, String> {
        (**self).add_message(thread_id, content, usage_data).await
    }

    async fn add_messages(
        &self,
        thread_id: &str,
        contents: &[MessageContent],
    ) -> Result<Vec<Message>, String> {
        (**self).add_messages(thread_id, contents).await
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, String> {
        (**self).get_messages(thread_id).await
    }
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    async fn update_state(&self, thread_id: &str, state: &ConvState) -> Result<(), String> {
        (**self).update_state(thread_id, state).await
    }
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        tokens: &mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        (**self).complete_streaming(request, tokens).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        (**self).execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        (**self).definitions()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for DatabaseStorage {
    async fn add_message(
        &self,
        thread_id: &str,
        content: &MessageContent,
        usage_data: Option<&UsageData>,
    ) -> Result<Message, String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .add_message(&id, thread_id, content, usage_data)
            .map_err(|e| e.to_string())
    }

    async fn add_messages(
        &self,
        thread_id: &str,
        contents: &[MessageContent],
    ) -> Result<Vec<Message>, String> {
        self.db
            .add_messages(thread_id, contents)
            .map_err(|e| e.to_string())
    }

    async fn get_messages(&self, thread_id: &str) -> Result<Vec<Message>, String> {
        self.db.get_messages(thread_id).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl StateStore for DatabaseStorage {
    async fn update_state(&self, thread_id: &str, state: &ConvState) -> Result<(), String> {
        self.db
            .update_thread_state(thread_id, state)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Adapter to use `ModelRegistry` as `LlmClient`
pub struct RegistryLlmClient {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryLlmClient {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }
}

#[async_trait]
impl LlmClient for RegistryLlmClient {
    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        tokens: &mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let llm = self
            .registry
            .get(&self.model_id)
            .or_else(|| self.registry.get(self.registry.default_model_id()))
            .ok_or_else(|| LlmError::auth("No LLM available. Set OPENAI_API_KEY."))?;
        llm.complete_streaming(request, tokens).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Adapter to use `ToolRegistry` as `ToolExecutor`
pub struct ToolRegistryExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolRegistryExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryExecutor {
    async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.registry.definitions()
    }
}
