//! Runtime for executing conversations
//!
//! One task per active thread owns that thread's state machine and applies
//! events to it serially.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ConversationRuntime;
pub use traits::*;

use crate::db::Database;
use crate::llm::ModelRegistry;
use crate::rag::DocumentRegistry;
use crate::state_machine::state::DEFAULT_MAX_TOOL_ROUNDS;
use crate::state_machine::{ConvContext, ConvState, Event};
use crate::tools::ToolRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime =
    ConversationRuntime<DatabaseStorage, RegistryLlmClient, ToolRegistryExecutor>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Tool rounds allowed per user turn; `None` is unbounded
    pub max_tool_rounds: Option<u32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: Some(DEFAULT_MAX_TOOL_ROUNDS),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        std::env::var("RAGBOT_MAX_TOOL_ROUNDS")
            .ok()
            .map_or_else(Self::default, |v| Self {
                max_tool_rounds: parse_max_tool_rounds(&v),
            })
    }
}

/// `0`, `none` and `unlimited` disable the bound; anything unparseable
/// falls back to the default
fn parse_max_tool_rounds(value: &str) -> Option<u32> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("unlimited") {
        return None;
    }
    match value.parse::<u32>() {
        Ok(0) => None,
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(value = %value, "Invalid RAGBOT_MAX_TOOL_ROUNDS, using default");
            Some(DEFAULT_MAX_TOOL_ROUNDS)
        }
    }
}

/// Manager for all conversation runtimes
pub struct RuntimeManager {
    db: Database,
    llm_registry: Arc<ModelRegistry>,
    tools: Arc<ToolRegistry>,
    documents: Arc<DocumentRegistry>,
    config: RuntimeConfig,
    runtimes: RwLock<HashMap<String, ConversationHandle>>,
}

/// Handle to interact with a running conversation
#[derive(Clone)]
pub struct ConversationHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        thread: serde_json::Value,
        messages: Vec<serde_json::Value>,
        agent_working: bool,
        last_sequence_id: i64,
        document: Option<serde_json::Value>,
    },
    /// Streamed assistant text
    Token {
        text: String,
    },
    Message {
        message: serde_json::Value,
    },
    StateChange {
        /// Full state as JSON object (e.g., `{"type":"reasoning","round":0}`)
        state: serde_json::Value,
    },
    AgentDone,
    Error {
        message: String,
    },
}

impl RuntimeManager {
    pub fn new(
        db: Database,
        llm_registry: Arc<ModelRegistry>,
        tools: Arc<ToolRegistry>,
        documents: Arc<DocumentRegistry>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            db,
            llm_registry,
            tools,
            documents,
            config,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create a runtime for a thread
    pub async fn get_or_create(&self, thread_id: &str) -> Result<ConversationHandle, String> {
        if let Some(handle) = self.runtimes.read().await.get(thread_id) {
            return Ok(handle.clone());
        }

        let mut runtimes = self.runtimes.write().await;
        // Another caller may have started it while we waited for the lock
        if let Some(handle) = runtimes.get(thread_id) {
            return Ok(handle.clone());
        }

        let thread = self.db.get_thread(thread_id).map_err(|e| e.to_string())?;

        // No runtime was driving this thread, so nothing is in flight
        let initial_state = if thread.state.is_working() {
            ConvState::Idle
        } else {
            thread.state
        };

        let model_id = self.llm_registry.default_model_id().to_string();
        let context = ConvContext::new(thread_id, &model_id)
            .with_max_tool_rounds(self.config.max_tool_rounds);

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(256);

        let runtime: ProductionRuntime = ConversationRuntime::new(
            context,
            initial_state,
            DatabaseStorage::new(self.db.clone()),
            RegistryLlmClient::new(self.llm_registry.clone(), model_id),
            ToolRegistryExecutor::new(self.tools.clone()),
            self.documents.clone(),
            event_rx,
            &event_tx,
            broadcast_tx.clone(),
        );

        let id = thread_id.to_string();
        tokio::spawn(async move {
            runtime.run().await;
            tracing::info!(thread_id = %id, "Conversation runtime finished");
        });

        let handle = ConversationHandle {
            event_tx,
            broadcast_tx,
        };
        runtimes.insert(thread_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Send an event to a thread
    pub async fn send_event(&self, thread_id: &str, event: Event) -> Result<(), String> {
        let handle = self.get_or_create(thread_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {e}"))
    }

    /// Subscribe to thread updates
    pub async fn subscribe(
        &self,
        thread_id: &str,
    ) -> Result<broadcast::Receiver<SseEvent>, String> {
        let handle = self.get_or_create(thread_id).await?;
        Ok(handle.broadcast_tx.subscribe())
    }

    /// Forget a thread's runtime; it stops once in-flight work drains
    pub async fn remove(&self, thread_id: &str) {
        self.runtimes.write().await.remove(thread_id);
    }

    /// Get the database handle
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn documents(&self) -> &Arc<DocumentRegistry> {
        &self.documents
    }
}
