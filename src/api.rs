//! HTTP API for ragbot
//!
//! JSON endpoints for threads, chat and document upload, an SSE stream per
//! thread, and the embedded single-page UI.

mod assets;
mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::llm::ModelRegistry;
use crate::runtime::RuntimeManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
    pub llm_registry: Arc<ModelRegistry>,
}

impl AppState {
    pub fn new(runtime: RuntimeManager, llm_registry: Arc<ModelRegistry>) -> Self {
        Self {
            runtime: Arc::new(runtime),
            llm_registry,
        }
    }
}
