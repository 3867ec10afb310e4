//! HTTP surface for Rusty RAG.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /sessions` – Create an empty chat session.
//! - `GET /sessions/:id` – Session state, documents, and chunk count.
//! - `DELETE /sessions/:id` – Destroy a session and its knowledge base.
//! - `POST /sessions/:id/documents` – Multipart upload of one or more PDFs; builds a new
//!   knowledge base and returns `{ status, documents, skipped, pages, chunks }`.
//! - `POST /sessions/:id/questions` – Ask a question; returns `{ answer, sources }`.
//! - `GET /metrics` – Pipeline counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Errors are returned as `{ "status": "error", "kind": ..., "reason": ... }` with a status code
//! derived from the error kind.

use crate::extraction::UploadedDocument;
use crate::metrics::MetricsSnapshot;
use crate::processing::RetrievedChunk;
use crate::session::{
    DocumentSummary, QuestionError, Session, SessionRegistry, SessionState, SessionStatus,
    SkippedDocument, UploadError,
};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Build the HTTP router over a session registry.
///
/// `max_upload_bytes` bounds the request body accepted by the document upload route.
pub fn create_router(registry: Arc<SessionRegistry>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route(
            "/sessions/:id/documents",
            post(upload_documents).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/sessions/:id/questions", post(ask_question))
        .route("/metrics", get(get_metrics))
        .route("/commands", get(get_commands))
        .with_state(registry)
}

/// Response body for `POST /sessions`.
#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: Uuid,
    state: SessionState,
}

async fn create_session(
    State(registry): State<Arc<SessionRegistry>>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let session = registry.create().await;
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id(),
            state: session.state().await,
        }),
    )
}

async fn get_session(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, AppError> {
    let session = find_session(&registry, &id).await?;
    Ok(Json(session.status().await))
}

async fn delete_session(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let session_id = parse_session_id(&id)?;
    if registry.remove(session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound(id))
    }
}

/// Success response for `POST /sessions/:id/documents`.
#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    documents: Vec<DocumentSummary>,
    skipped: Vec<SkippedDocument>,
    pages: usize,
    chunks: usize,
}

/// Collect every file part of the multipart body and process it into a new knowledge base.
///
/// Parts without a filename are form fields, not files, and are ignored.
async fn upload_documents(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let session = find_session(&registry, &id).await?;
    let mut multipart = multipart.map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))?;

    let mut documents = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(AppError::Multipart)? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(AppError::Multipart)?;
        tracing::debug!(
            session = %session.id(),
            filename = %filename,
            content_type = ?content_type,
            bytes = bytes.len(),
            "Received upload part"
        );
        documents.push(UploadedDocument::new(filename, content_type, bytes.to_vec()));
    }

    let outcome = session.upload(documents).await?;
    Ok(Json(UploadResponse {
        status: "ready",
        documents: outcome.documents,
        skipped: outcome.skipped,
        pages: outcome.pages,
        chunks: outcome.chunks,
    }))
}

/// Request body for `POST /sessions/:id/questions`.
#[derive(Deserialize)]
struct QuestionRequest {
    question: String,
}

/// Success response for `POST /sessions/:id/questions`.
#[derive(Serialize)]
struct QuestionResponse {
    answer: String,
    sources: Vec<RetrievedChunk>,
}

async fn ask_question(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
    request: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<QuestionResponse>, AppError> {
    let session = find_session(&registry, &id).await?;
    let Json(request) = request.map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))?;
    let answer = session.ask(&request.question).await?;
    Ok(Json(QuestionResponse {
        answer: answer.text,
        sources: answer.sources,
    }))
}

async fn get_metrics(State(registry): State<Arc<SessionRegistry>>) -> Json<MetricsSnapshot> {
    Json(registry.metrics())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "create_session",
                method: "POST",
                path: "/sessions",
                description: "Create an empty chat session. Response returns { \"session_id\": uuid, \"state\": \"empty\" }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "session_status",
                method: "GET",
                path: "/sessions/:id",
                description: "Return session state, processed documents, and chunk count.",
                request_example: None,
            },
            CommandDescriptor {
                name: "delete_session",
                method: "DELETE",
                path: "/sessions/:id",
                description: "Destroy a session and its knowledge base.",
                request_example: None,
            },
            CommandDescriptor {
                name: "upload_documents",
                method: "POST",
                path: "/sessions/:id/documents",
                description: "Multipart upload of one or more PDF files. Extracts, chunks, and embeds the text into a fresh knowledge base, replacing any previous one.",
                request_example: None,
            },
            CommandDescriptor {
                name: "ask_question",
                method: "POST",
                path: "/sessions/:id/questions",
                description: "Answer a question from the session's documents. Response returns { \"answer\": string, \"sources\": [...] }.",
                request_example: Some(json!({
                    "question": "What does the document say about ownership?"
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return processing and question counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

async fn find_session(registry: &SessionRegistry, id: &str) -> Result<Arc<Session>, AppError> {
    let session_id = parse_session_id(id)?;
    registry
        .get(session_id)
        .await
        .ok_or_else(|| AppError::SessionNotFound(id.to_string()))
}

fn parse_session_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::SessionNotFound(id.to_string()))
}

enum AppError {
    SessionNotFound(String),
    InvalidRequest(String),
    Multipart(MultipartError),
    Upload(UploadError),
    Question(QuestionError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Multipart(error) if error.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Self::Multipart(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upload(error) => match error {
                UploadError::UploadInProgress => StatusCode::CONFLICT,
                UploadError::UnsupportedDocument { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                UploadError::NoDocuments
                | UploadError::DocumentUnreadable(_)
                | UploadError::NoExtractableText => StatusCode::UNPROCESSABLE_ENTITY,
                UploadError::EmbeddingFailure(_) | UploadError::Build(_) => StatusCode::BAD_GATEWAY,
                UploadError::Chunking(_) | UploadError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Question(error) => match error {
                QuestionError::NotReady | QuestionError::RetrievalEmpty => StatusCode::CONFLICT,
                QuestionError::EmptyQuestion => StatusCode::UNPROCESSABLE_ENTITY,
                QuestionError::EmbeddingFailure(_) | QuestionError::GenerationFailure(_) => {
                    StatusCode::BAD_GATEWAY
                }
                QuestionError::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                QuestionError::Retrieval(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Multipart(error) if error.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                "payload_too_large"
            }
            Self::Multipart(_) => "invalid_multipart",
            Self::Upload(error) => error.kind(),
            Self::Question(error) => error.kind(),
        }
    }

    fn reason(&self) -> String {
        match self {
            Self::SessionNotFound(id) => format!("session '{id}' not found"),
            Self::InvalidRequest(reason) => reason.clone(),
            Self::Multipart(error) => error.body_text(),
            Self::Upload(error) => error.to_string(),
            Self::Question(error) => error.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "status": "error",
            "kind": self.kind(),
            "reason": self.reason(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(inner: UploadError) -> Self {
        Self::Upload(inner)
    }
}

impl From<QuestionError> for AppError {
    fn from(inner: QuestionError) -> Self {
        Self::Question(inner)
    }
}
