//! API request and response types

use crate::db::ChatTurn;
use crate::rag::DocumentMetadata;
use serde::{Deserialize, Serialize};

/// Request to create a new thread
#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    /// Caller-chosen id; a fresh UUID when absent
    #[serde(default)]
    pub id: Option<String>,
}

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

/// Response with a list of threads
#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<serde_json::Value>,
}

/// Response with a single thread
#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread: serde_json::Value,
}

/// Response with a thread, its message log and the rendered transcript
#[derive(Debug, Serialize)]
pub struct ThreadWithMessagesResponse {
    pub thread: serde_json::Value,
    pub messages: Vec<serde_json::Value>,
    pub transcript: Vec<ChatTurn>,
    pub agent_working: bool,
    pub document: Option<DocumentMetadata>,
}

/// Response for chat action
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub queued: bool,
}

/// Response for delete
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Model information with metadata
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub description: String,
    pub context_window: usize,
}

/// Response for model list
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
