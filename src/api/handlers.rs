//! HTTP request handlers

use super::assets::{get_index_html, serve_static};
use super::sse::sse_stream;
use super::types::{
    ChatRequest, ChatResponse, CreateThreadRequest, ErrorResponse, ModelsResponse,
    SuccessResponse, ThreadListResponse, ThreadResponse, ThreadWithMessagesResponse,
};
use super::AppState;
use crate::db::{transcript, DbError};
use crate::rag::{DocumentMetadata, IngestError};
use crate::runtime::SseEvent;
use crate::state_machine::Event;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

/// Largest accepted upload
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Root serves the UI
        .route("/", get(serve_spa))
        .route("/assets/*path", get(serve_static))
        // Threads
        .route("/api/threads", get(list_threads).post(create_thread))
        .route("/api/threads/:id", get(get_thread).delete(delete_thread))
        .route("/api/threads/:id/stream", get(stream_thread))
        .route("/api/threads/:id/chat", post(send_chat))
        // Documents
        .route(
            "/api/threads/:id/document",
            get(get_document)
                .post(upload_document)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        // Model info
        .route("/api/models", get(list_models))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// UI
// ============================================================

async fn serve_spa() -> Response {
    match get_index_html() {
        Some(content) => Html(content).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Html("<h1>404 - UI not found</h1>".to_string()),
        )
            .into_response(),
    }
}

// ============================================================
// Threads
// ============================================================

async fn list_threads(State(state): State<AppState>) -> Result<Json<ThreadListResponse>, AppError> {
    let db = state.runtime.db();
    let ids = db.list_thread_ids()?;

    let mut threads = Vec::with_capacity(ids.len());
    for id in ids {
        match db.get_thread(&id) {
            Ok(thread) => threads.push(serde_json::to_value(thread).unwrap_or(Value::Null)),
            // Deleted between the two reads
            Err(DbError::ThreadNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Json(ThreadListResponse { threads }))
}

async fn create_thread(
    State(state): State<AppState>,
    body: Option<Json<CreateThreadRequest>>,
) -> Result<(StatusCode, Json<ThreadResponse>), AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let id = match req.id {
        Some(id) if id.trim().is_empty() => {
            return Err(AppError::BadRequest("Thread id must not be empty".to_string()))
        }
        Some(id) => id.trim().to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };

    let thread = state.runtime.db().create_thread(&id)?;
    tracing::info!(thread_id = %id, "Created thread");

    Ok((
        StatusCode::CREATED,
        Json(ThreadResponse {
            thread: serde_json::to_value(&thread).unwrap_or(Value::Null),
        }),
    ))
}

async fn get_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadWithMessagesResponse>, AppError> {
    let db = state.runtime.db();
    let thread = db.get_thread(&id)?;
    let messages = db.get_messages(&id)?;

    Ok(Json(ThreadWithMessagesResponse {
        thread: serde_json::to_value(&thread).unwrap_or(Value::Null),
        transcript: transcript(&messages),
        messages: messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect(),
        agent_working: thread.is_agent_working(),
        document: state.runtime.documents().metadata(&id),
    }))
}

async fn delete_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.runtime.db().delete_thread(&id)?;
    state.runtime.remove(&id).await;
    state.runtime.documents().remove(&id);
    tracing::info!(thread_id = %id, "Deleted thread");

    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// SSE Streaming
// ============================================================

#[derive(Debug, Deserialize)]
struct StreamQuery {
    after: Option<i64>,
}

async fn stream_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, AppError> {
    let db = state.runtime.db();
    db.get_thread(&id)?;

    // Subscribe before taking the snapshot so nothing falls in between
    let broadcast_rx = state
        .runtime
        .subscribe(&id)
        .await
        .map_err(AppError::Internal)?;

    let thread = db.get_thread(&id)?;
    let messages = match query.after {
        Some(after) => db.get_messages_after(&id, after)?,
        None => db.get_messages(&id)?,
    };
    let last_sequence_id = db.get_last_sequence_id(&id)?;

    let init_event = SseEvent::Init {
        thread: serde_json::to_value(&thread).unwrap_or(Value::Null),
        messages: messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect(),
        agent_working: thread.is_agent_working(),
        last_sequence_id,
        document: state
            .runtime
            .documents()
            .metadata(&id)
            .and_then(|doc| serde_json::to_value(doc).ok()),
    };

    Ok(sse_stream(init_event, broadcast_rx))
}

// ============================================================
// Chat
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text must not be empty".to_string()));
    }

    let thread = ensure_thread(&state, &id)?;
    if thread.is_agent_working() {
        return Err(AppError::Conflict(
            "The assistant is still answering the previous message".to_string(),
        ));
    }

    state
        .runtime
        .send_event(&id, Event::UserMessage { text: req.text })
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(ChatResponse { queued: true }))
}

/// Threads are created on first use, so any id a client holds is valid
fn ensure_thread(state: &AppState, id: &str) -> Result<crate::db::Thread, AppError> {
    let db = state.runtime.db();
    let thread = match db.get_thread(id) {
        Err(DbError::ThreadNotFound(_)) => match db.create_thread(id) {
            // Lost a race with a concurrent create
            Err(DbError::ThreadExists(_)) => db.get_thread(id),
            created => created,
        },
        found => found,
    };
    thread.map_err(AppError::from)
}

// ============================================================
// Documents
// ============================================================

async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentMetadata>, AppError> {
    state
        .runtime
        .documents()
        .metadata(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No document indexed for thread {id}")))
}

async fn upload_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentMetadata>), AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(ToString::to_string);
        let content_type = field.content_type().map(ToString::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
        upload = Some((filename, content_type, bytes));
        break;
    }

    let Some((filename, content_type, bytes)) = upload else {
        return Err(AppError::BadRequest("Missing 'file' field".to_string()));
    };
    if !is_pdf(filename.as_deref(), content_type.as_deref()) {
        return Err(AppError::BadRequest("Only PDF uploads are supported".to_string()));
    }

    ensure_thread(&state, &id)?;
    let metadata = state
        .runtime
        .documents()
        .ingest_pdf(&bytes, &id, filename.as_deref())
        .await
        .map_err(|e| {
            tracing::warn!(thread_id = %id, error = %e, "Document ingestion failed");
            AppError::from(e)
        })?;

    Ok((StatusCode::CREATED, Json(metadata)))
}

fn is_pdf(filename: Option<&str>, content_type: Option<&str>) -> bool {
    let by_type = content_type.is_some_and(|ct| ct.eq_ignore_ascii_case("application/pdf"));
    let by_name = filename.is_some_and(|name| {
        std::path::Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
    });
    by_type || by_name
}

// ============================================================
// Model Info
// ============================================================

async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.llm_registry.available_model_info(),
        default: state.llm_registry.default_model_id().to_string(),
    })
}

async fn get_version() -> &'static str {
    concat!("ragbot ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::ThreadNotFound(_) => AppError::NotFound(e.to_string()),
            DbError::ThreadExists(_) => AppError::Conflict(e.to_string()),
            DbError::Sqlite(_) | DbError::Serde(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::EmptyInput | IngestError::Pdf(_) | IngestError::NoText => {
                AppError::BadRequest(e.to_string())
            }
            IngestError::Io(_) | IngestError::Embedding(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
