//! LLM provider abstraction
//!
//! Provides a common interface for chat completions and embeddings.

mod embeddings;
mod error;
mod models;
mod openai;
mod registry;
mod types;

pub use embeddings::{EmbeddingService, OpenAIEmbeddings};
pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAIService;
pub use registry::{LlmConfig, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a streaming completion request, sending text deltas to
    /// `tokens` as they arrive. The returned response holds the full
    /// content.
    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        tokens: &mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }

    fn log(&self, result: &Result<LlmResponse, LlmError>, duration: Duration) {
        match result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    "LLM request failed"
                );
            }
        }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete_streaming(
        &self,
        request: &LlmRequest,
        tokens: &mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete_streaming(request, tokens).await;
        self.log(&result, start.elapsed());
        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
