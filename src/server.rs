//! HTTP server for the chat service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/chat` | JSON `{question, session_id?}` → `{response}` |
//! | `POST` | `/chat/upload` | multipart `document`, `question?`, `session_id?` → `{response}` |
//! | `POST` | `/api/upload` | multipart `document` → `{result}` (ingest only) |
//! | `POST` | `/api/debug-upload` | multipart `document` → what the server received |
//! | `GET`  | `/history` | `?limit=` (default 20) → `{turns}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).
//!
//! Uploads are checked here, before anything touches disk: the document
//! must fit in `upload.max_bytes` and carry an allowed content type.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatService, DEFAULT_SESSION};
use crate::config::{Config, UploadConfig};
use crate::extract::{MIME_DOCX, MIME_PDF, MIME_TEXT};
use crate::models::ConversationTurn;

/// Content types accepted for uploads.
pub const ALLOWED_CONTENT_TYPES: [&str; 7] = [
    MIME_PDF,
    MIME_DOCX,
    MIME_TEXT,
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
];

/// Headroom for multipart framing and the text fields around the document.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

const DEFAULT_HISTORY_LIMIT: i64 = 20;

#[derive(Clone)]
struct AppState {
    service: Arc<ChatService>,
    max_bytes: usize,
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(ChatService::from_config(config).await?);
    let app = build_router(service, &config.upload);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "chat server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(service: Arc<ChatService>, upload: &UploadConfig) -> Router {
    let state = AppState {
        service,
        max_bytes: upload.max_bytes,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/chat", post(handle_chat))
        .route("/chat/upload", post(handle_chat_upload))
        .route("/api/upload", post(handle_api_upload))
        .route("/api/debug-upload", post(handle_debug_upload))
        .route("/history", get(handle_history))
        .layer(DefaultBodyLimit::max(upload.max_bytes + MULTIPART_OVERHEAD))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

// ============ Multipart ============

/// An uploaded document that passed boundary validation.
struct UploadedDocument {
    name: String,
    content_type: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct UploadForm {
    document: Option<UploadedDocument>,
    question: String,
    session_id: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart, max_bytes: usize) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e.body_text())))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "document" => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let declared = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read document: {}", e.body_text())))?;
                if bytes.len() > max_bytes {
                    return Err(bad_request(format!(
                        "document is {} bytes; the limit is {} bytes",
                        bytes.len(),
                        max_bytes
                    )));
                }
                let content_type = resolve_content_type(&name, declared.as_deref());
                if !is_allowed_content_type(&content_type) {
                    return Err(bad_request(format!(
                        "unsupported content type: {}",
                        content_type
                    )));
                }
                form.document = Some(UploadedDocument {
                    name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "question" => {
                form.question = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid question field: {}", e.body_text())))?;
            }
            "session_id" => {
                let session = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid session_id field: {}", e.body_text())))?;
                if !session.trim().is_empty() {
                    form.session_id = Some(session.trim().to_string());
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

/// The declared content type, or one inferred from the file extension when
/// the client sent none (or a generic octet-stream).
fn resolve_content_type(file_name: &str, declared: Option<&str>) -> String {
    let declared = declared
        .map(|ct| ct.trim().to_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
    if let Some(ct) = declared {
        return ct;
    }

    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Compares the media type without parameters (`text/plain; charset=utf-8`).
pub fn is_allowed_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    ALLOWED_CONTENT_TYPES.contains(&essence.as_str())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let session = req.session_id.as_deref().unwrap_or(DEFAULT_SESSION);

    let response = state.service.chat(session, question).await;
    Ok(Json(ChatResponse { response }))
}

// ============ POST /chat/upload ============

async fn handle_chat_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ChatResponse>, AppError> {
    let form = read_upload_form(multipart, state.max_bytes).await?;
    let session = form.session_id.as_deref().unwrap_or(DEFAULT_SESSION);

    let response = match form.document {
        Some(doc) => {
            tracing::info!(file = %doc.name, size = doc.bytes.len(), "chat upload received");
            state
                .service
                .upload(
                    session,
                    &doc.name,
                    Some(&doc.content_type),
                    &doc.bytes,
                    &form.question,
                )
                .await
                .map_err(internal)?
        }
        None if !form.question.trim().is_empty() => {
            state.service.chat(session, form.question.trim()).await
        }
        None => return Err(bad_request("provide a question or a document")),
    };

    Ok(Json(ChatResponse { response }))
}

// ============ POST /api/upload ============

#[derive(Serialize)]
struct UploadResponse {
    result: String,
}

async fn handle_api_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let form = read_upload_form(multipart, state.max_bytes).await?;
    let doc = form
        .document
        .ok_or_else(|| bad_request("No file provided"))?;

    tracing::info!(file = %doc.name, size = doc.bytes.len(), "api upload received");
    let result = state
        .service
        .ingest_upload(&doc.name, Some(&doc.content_type), &doc.bytes)
        .await
        .map_err(internal)?;

    Ok(Json(UploadResponse { result }))
}

// ============ POST /api/debug-upload ============

#[derive(Serialize)]
struct DebugUploadResponse {
    name: String,
    size: usize,
    content_type: String,
    received: bool,
}

async fn handle_debug_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DebugUploadResponse>, AppError> {
    let form = read_upload_form(multipart, state.max_bytes).await?;
    let doc = form
        .document
        .ok_or_else(|| bad_request("No file received"))?;

    tracing::info!(file = %doc.name, size = doc.bytes.len(), "debug upload");
    Ok(Json(DebugUploadResponse {
        name: doc.name,
        size: doc.bytes.len(),
        content_type: doc.content_type,
        received: true,
    }))
}

// ============ GET /history ============

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct HistoryResponse {
    turns: Vec<ConversationTurn>,
}

async fn handle_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit < 1 {
        return Err(bad_request("limit must be at least 1"));
    }
    let turns = state.service.history(limit).await.map_err(internal)?;
    Ok(Json(HistoryResponse { turns }))
}
