//! HTTP API.
//!
//! Endpoints:
//!
//! - `POST   /api/chat`                       run a turn, stream frames as SSE
//! - `POST   /api/upload`                     upload a document (multipart)
//! - `GET    /api/chat/{chat_id}/files`       list a chat's documents
//! - `DELETE /api/files/{chat_id}/{filename}` remove a document (404 when missing)
//! - `GET    /api/health`                     liveness
//! - `GET    /api/events`                     SSE stream of domain events

use axum::{
    Router,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{info, warn};

use afina_agent::ChatRuntime;
use afina_core::error::FileError;
use afina_core::message::ConversationId;
use afina_files::{StoredFile, validate_name};

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the API.
pub struct ApiState {
    pub runtime: Arc<ChatRuntime>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl ApiState {
    pub fn new(runtime: Arc<ChatRuntime>) -> Self {
        Self {
            runtime,
            start_time: chrono::Utc::now(),
        }
    }
}

pub type SharedApiState = Arc<ApiState>;

// ── Router ────────────────────────────────────────────────────────────────

pub fn api_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/upload", post(upload_handler))
        .route("/chat/{chat_id}/files", get(list_files_handler))
        .route("/files/{chat_id}/{filename}", delete(delete_file_handler))
        .route("/health", get(health_handler))
        .route("/events", get(events_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    chat_id: String,
    message: String,
    /// Names of previously uploaded documents to attach to this turn.
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize, Deserialize)]
struct UploadResponse {
    success: bool,
    filename: String,
    chat_id: String,
    size: u64,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct FileListResponse {
    files: Vec<FileDto>,
}

#[derive(Serialize, Deserialize)]
struct FileDto {
    name: String,
    size: u64,
}

impl From<StoredFile> for FileDto {
    fn from(file: StoredFile) -> Self {
        Self {
            name: file.name,
            size: file.size,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DeleteResponse {
    success: bool,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    message: String,
    version: String,
    uptime_secs: i64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into() }))
}

fn file_error(e: FileError) -> ApiError {
    let status = match e {
        FileError::InvalidName(_) => StatusCode::BAD_REQUEST,
        FileError::NotFound(_) => StatusCode::NOT_FOUND,
        FileError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

fn chat_id(raw: &str) -> Result<ConversationId, ApiError> {
    validate_name(raw).map_err(file_error)?;
    Ok(ConversationId::from(raw))
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /api/chat`: each SSE event is `data: {"content": ..., "done": ...}`.
async fn chat_handler(
    State(state): State<SharedApiState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let id = chat_id(&payload.chat_id)?;
    info!(
        conversation_id = %id,
        files = payload.files.len(),
        message_len = payload.message.len(),
        "Chat request"
    );

    let rx = state
        .runtime
        .process_turn(id, payload.message, payload.files);

    let stream = ReceiverStream::new(rx).map(|frame| {
        let data = serde_json::to_string(&frame).unwrap_or_default();
        Ok(SseEvent::default().data(data))
    });

    Ok(Sse::new(stream))
}

/// `POST /api/upload`: multipart fields `chat_id` and `file`.
async fn upload_handler(
    State(state): State<SharedApiState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut chat: Option<String> = None;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("chat_id") => {
                let text = field.text().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("Invalid chat_id field: {e}"))
                })?;
                chat = Some(text);
            }
            Some("file") => {
                // Browsers may send a full client-side path; keep the last component
                let filename = field
                    .file_name()
                    .map(|name| name.rsplit(['/', '\\']).next().unwrap_or(name).to_string())
                    .unwrap_or_default();
                let bytes = field.bytes().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("Failed to read file: {e}"))
                })?;
                upload = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let chat = chat.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing chat_id field"))?;
    let (filename, bytes) =
        upload.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing file field"))?;
    let id = chat_id(&chat)?;

    let stored = state
        .runtime
        .files()
        .store()
        .save(&id, &filename, &bytes)
        .await
        .map_err(file_error)?;

    info!(conversation_id = %id, file = %stored.name, size = stored.size, "File uploaded");

    Ok(Json(UploadResponse {
        success: true,
        message: format!("Файл {} успешно загружен в чат!", stored.name),
        filename: stored.name,
        chat_id: chat,
        size: stored.size,
    }))
}

async fn list_files_handler(
    State(state): State<SharedApiState>,
    Path(chat): Path<String>,
) -> Result<Json<FileListResponse>, ApiError> {
    let id = chat_id(&chat)?;
    let files = state
        .runtime
        .files()
        .store()
        .list(&id)
        .await
        .map_err(file_error)?;

    Ok(Json(FileListResponse {
        files: files.into_iter().map(FileDto::from).collect(),
    }))
}

async fn delete_file_handler(
    State(state): State<SharedApiState>,
    Path((chat, filename)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = chat_id(&chat)?;
    state
        .runtime
        .files()
        .store()
        .delete(&id, &filename)
        .await
        .map_err(|e| {
            if !matches!(e, FileError::NotFound(_)) {
                warn!(conversation_id = %id, file = %filename, error = %e, "Delete failed");
            }
            file_error(e)
        })?;

    info!(conversation_id = %id, file = %filename, "File deleted");
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("Файл {filename} удален"),
    }))
}

async fn health_handler(State(state): State<SharedApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        message: "Afina API работает".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
    })
}

/// `GET /api/events`: domain events (turns, routes, tool runs) as SSE.
async fn events_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.runtime.event_bus().subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.event_type()).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
