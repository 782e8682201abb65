//! Thread-scoped registry of document indices

use super::index::{Chunk, ChunkMetadata, ScoredChunk, VectorIndex};
use super::splitter::TextSplitter;
use super::{pdf, IngestError};
use crate::llm::{EmbeddingService, LlmError};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_DOCUMENT_CAPACITY: u64 = 64;

#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Most threads that keep an index at once
    pub capacity: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_DOCUMENT_CAPACITY,
        }
    }
}

impl RagConfig {
    pub fn from_env() -> Self {
        let capacity = std::env::var("RAGBOT_DOCUMENT_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n: &u64| n > 0)
            .unwrap_or(DEFAULT_DOCUMENT_CAPACITY);
        Self { capacity }
    }
}

/// Summary of an indexed upload
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub filename: String,
    /// Pages read from the PDF
    pub number_of_documents: usize,
    pub number_of_chunks: usize,
}

/// A thread's index and the metadata describing it, replaced together
#[derive(Debug)]
pub struct ThreadDocument {
    pub index: VectorIndex,
    pub metadata: DocumentMetadata,
}

/// Maps thread ids to their document index.
///
/// Bounded; the least recently used thread loses its index first.
pub struct DocumentRegistry {
    documents: Cache<String, Arc<ThreadDocument>>,
    embedder: Arc<dyn EmbeddingService>,
    splitter: TextSplitter,
}

impl DocumentRegistry {
    pub fn new(embedder: Arc<dyn EmbeddingService>, config: &RagConfig) -> Self {
        Self {
            documents: Cache::builder()
                .max_capacity(config.capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            embedder,
            splitter: TextSplitter::default(),
        }
    }

    /// Index an uploaded PDF for `thread_id`, replacing any earlier upload
    pub async fn ingest_pdf(
        &self,
        bytes: &[u8],
        thread_id: &str,
        filename: Option<&str>,
    ) -> Result<DocumentMetadata, IngestError> {
        if bytes.is_empty() {
            return Err(IngestError::EmptyInput);
        }

        let owned = bytes.to_vec();
        let extracted = tokio::task::spawn_blocking(move || pdf::extract_pages(&owned))
            .await
            .map_err(|e| IngestError::Pdf(format!("PDF extraction aborted: {e}")))??;

        let filename = filename
            .filter(|f| !f.trim().is_empty())
            .map_or_else(|| extracted.file_name.clone(), ToString::to_string);
        self.ingest_pages(thread_id, &filename, &extracted.source, &extracted.pages)
            .await
    }

    /// Index already-extracted page texts
    pub async fn ingest_pages(
        &self,
        thread_id: &str,
        filename: &str,
        source: &str,
        pages: &[String],
    ) -> Result<DocumentMetadata, IngestError> {
        let mut chunks = Vec::new();
        for (page, text) in pages.iter().enumerate() {
            for piece in self.splitter.split(text) {
                let chunk = chunks.len();
                chunks.push(Chunk {
                    text: piece,
                    metadata: ChunkMetadata {
                        source: source.to_string(),
                        page,
                        chunk,
                    },
                });
            }
        }
        if chunks.is_empty() {
            return Err(IngestError::NoText);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(IngestError::Embedding(LlmError::unknown(format!(
                "Expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            ))));
        }

        let index = VectorIndex::new(chunks, embeddings);
        let metadata = DocumentMetadata {
            filename: filename.to_string(),
            number_of_documents: pages.len(),
            number_of_chunks: index.len(),
        };

        tracing::info!(
            thread_id = %thread_id,
            filename = %metadata.filename,
            pages = metadata.number_of_documents,
            chunks = metadata.number_of_chunks,
            embedding_model = %self.embedder.model_id(),
            "Indexed document"
        );

        self.documents.insert(
            thread_id.to_string(),
            Arc::new(ThreadDocument {
                index,
                metadata: metadata.clone(),
            }),
        );
        Ok(metadata)
    }

    pub fn get(&self, thread_id: &str) -> Option<Arc<ThreadDocument>> {
        self.documents.get(thread_id)
    }

    pub fn metadata(&self, thread_id: &str) -> Option<DocumentMetadata> {
        self.get(thread_id).map(|doc| doc.metadata.clone())
    }

    /// Top `k` chunks of the thread's document for `query`, or `None` when
    /// the thread has no document
    pub async fn search(
        &self,
        thread_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Option<(Arc<ThreadDocument>, Vec<ScoredChunk>)>, LlmError> {
        let Some(document) = self.get(thread_id) else {
            return Ok(None);
        };
        if document.index.is_empty() {
            return Ok(Some((document, Vec::new())));
        }

        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| LlmError::unknown("Embedding service returned no vector"))?;
        let hits = document.index.search(&query_vector, k);
        Ok(Some((document, hits)))
    }

    /// Drop a thread's document
    pub fn remove(&self, thread_id: &str) {
        self.documents.invalidate(thread_id);
    }

    /// Number of threads holding an index
    #[cfg(test)]
    pub fn document_count(&self) -> u64 {
        self.documents.run_pending_tasks();
        self.documents.entry_count()
    }
}
