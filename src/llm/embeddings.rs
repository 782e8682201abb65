//! Text embeddings through the `OpenAI` embeddings endpoint

use super::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inputs per embeddings request
const BATCH_SIZE: usize = 128;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Turns text into vectors
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed every text, returning one vector per input in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    fn model_id(&self) -> &str;
}

pub struct OpenAIEmbeddings {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAIEmbeddings {
    pub fn new(
        api_key: String,
        base_url: &str,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), &text));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::unknown(format!("Failed to parse embeddings: {e}")))?;
        if parsed.data.len() != batch.len() {
            return Err(LlmError::unknown(format!(
                "Expected {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingService for OpenAIEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
