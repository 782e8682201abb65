//! Per-thread document retrieval
//!
//! An uploaded PDF is split into overlapping chunks, embedded, and kept in
//! an in-memory index owned by the thread it was uploaded to. Indices live
//! for the life of the process only.

mod index;
mod pdf;
mod registry;
mod splitter;

pub use index::{ChunkMetadata, ScoredChunk};
pub use registry::{DocumentMetadata, DocumentRegistry, RagConfig};

#[cfg(test)]
pub use pdf::sample_pdf;

use crate::llm::LlmError;
use thiserror::Error;

/// Chunks returned per retrieval
pub const DEFAULT_TOP_K: usize = 4;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No bytes received for ingestion.")]
    EmptyInput,
    #[error("Could not stage upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not read PDF: {0}")]
    Pdf(String),
    #[error("No extractable text found in the document")]
    NoText,
    #[error("Embedding failed: {0}")]
    Embedding(#[from] LlmError),
}
