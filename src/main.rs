//! ragbot - a PDF-grounded, tool-using chatbot
//!
//! Serves an HTTP/SSE API over a per-thread conversation state machine
//! that can search an uploaded PDF, the web, stock quotes and a calculator.

mod api;
mod db;
mod llm;
mod rag;
mod runtime;
mod state_machine;
mod system_prompt;
mod tools;

use api::{create_router, AppState};
use db::Database;
use llm::{LlmConfig, ModelRegistry, OpenAIEmbeddings};
use rag::{DocumentRegistry, RagConfig};
use runtime::{RuntimeConfig, RuntimeManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tools::{ToolConfig, ToolRegistry};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is normal outside development
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragbot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }

    // Configuration
    let db_path = std::env::var("RAGBOT_DB_PATH").unwrap_or_else(|_| "chatbot.db".to_string());

    let port: u16 = std::env::var("RAGBOT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    if let Some(parent) = PathBuf::from(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;

    // Nothing survives a restart mid-turn
    db.reset_all_to_idle()?;

    // Models and embeddings
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API key configured. Set OPENAI_API_KEY.");
    }

    let embedder = OpenAIEmbeddings::new(
        llm_config.openai_api_key.clone().unwrap_or_default(),
        &llm_config.base_url,
        llm_config.embedding_model.clone(),
    )?;

    let rag_config = RagConfig::from_env();
    let documents = Arc::new(DocumentRegistry::new(Arc::new(embedder), &rag_config));

    // Tools
    let http_client = reqwest::Client::builder()
        .timeout(tools::TOOL_TIMEOUT)
        .build()?;
    let tool_registry = Arc::new(ToolRegistry::standard(&http_client, &ToolConfig::from_env()));

    let runtime_config = RuntimeConfig::from_env();
    tracing::info!(
        max_tool_rounds = ?runtime_config.max_tool_rounds,
        document_capacity = rag_config.capacity,
        "Runtime configured"
    );

    let runtime = RuntimeManager::new(
        db,
        llm_registry.clone(),
        tool_registry,
        documents,
        runtime_config,
    );
    let state = AppState::new(runtime, llm_registry);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("ragbot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
