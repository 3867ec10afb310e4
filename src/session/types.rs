//! Session-level outcomes and the error taxonomy surfaced to callers.

use crate::embedding::EmbeddingClientError;
use crate::generation::GenerationClientError;
use crate::processing::{AnswerError, BuildError, ChunkingError, SearchError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No knowledge base; questions are rejected.
    Empty,
    /// An upload is being processed.
    Processing,
    /// A knowledge base is available for questions.
    Ready,
}

/// Summary of one document that contributed to the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    /// Client-supplied filename.
    pub filename: String,
    /// Number of pages found in the document.
    pub pages: usize,
    /// Hex-encoded SHA-256 of the document bytes.
    pub fingerprint: String,
}

/// A document left out of a multi-file upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDocument {
    /// Client-supplied filename.
    pub filename: String,
    /// Why the document could not be used.
    pub reason: String,
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    /// Documents whose pages were indexed, in upload order.
    pub documents: Vec<DocumentSummary>,
    /// Documents that could not be opened.
    pub skipped: Vec<SkippedDocument>,
    /// Total pages across accepted documents.
    pub pages: usize,
    /// Chunks stored in the new knowledge base.
    pub chunks: usize,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Session identifier.
    pub session_id: Uuid,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// Documents backing the current knowledge base.
    pub documents: Vec<DocumentSummary>,
    /// Chunks in the current knowledge base.
    pub chunks: usize,
}

/// Failures while constructing provider clients at startup.
#[derive(Debug, Error)]
pub enum ServiceInitError {
    /// Embedding client could not be built.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Generation client could not be built.
    #[error(transparent)]
    Generation(#[from] GenerationClientError),
}

/// Failures while processing an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The upload carried no files.
    #[error("no documents were uploaded")]
    NoDocuments,
    /// A file is not a PDF.
    #[error("unsupported document '{filename}' ({content_type})")]
    UnsupportedDocument {
        /// Offending filename.
        filename: String,
        /// Declared content type, or `unknown`.
        content_type: String,
    },
    /// Another upload for this session has not finished yet.
    #[error("an upload is already being processed for this session")]
    UploadInProgress,
    /// None of the uploaded documents could be opened.
    #[error("document could not be read: {0}")]
    DocumentUnreadable(String),
    /// The documents opened but contained no text.
    #[error("the uploaded documents contain no extractable text")]
    NoExtractableText,
    /// Chunking parameters were rejected.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// The embedding provider failed.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(EmbeddingClientError),
    /// The embedding provider returned inconsistent output.
    #[error("knowledge base build failed: {0}")]
    Build(BuildError),
    /// A background task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Stable machine-readable identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoDocuments => "no_documents",
            Self::UnsupportedDocument { .. } => "unsupported_document",
            Self::UploadInProgress => "upload_in_progress",
            Self::DocumentUnreadable(_) => "document_unreadable",
            Self::NoExtractableText => "no_extractable_text",
            Self::Chunking(_) => "chunking",
            Self::EmbeddingFailure(_) => "embedding_failure",
            Self::Build(_) => "build",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<BuildError> for UploadError {
    fn from(error: BuildError) -> Self {
        match error {
            BuildError::NoChunks => Self::NoExtractableText,
            BuildError::Embedding(inner) => Self::EmbeddingFailure(inner),
            other => Self::Build(other),
        }
    }
}

/// Failures while answering a question.
#[derive(Debug, Error)]
pub enum QuestionError {
    /// Blank question.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// No knowledge base has been built for this session.
    #[error("no documents have been processed for this session")]
    NotReady,
    /// The question could not be embedded.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(EmbeddingClientError),
    /// Search rejected the query.
    #[error(transparent)]
    Retrieval(#[from] SearchError),
    /// Retrieval produced no context.
    #[error("no context retrieved for the question")]
    RetrievalEmpty,
    /// The language model failed.
    #[error("generation failed: {0}")]
    GenerationFailure(GenerationClientError),
    /// The language model did not answer in time.
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),
}

impl QuestionError {
    /// Stable machine-readable identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyQuestion => "empty_question",
            Self::NotReady => "not_ready",
            Self::EmbeddingFailure(_) => "embedding_failure",
            Self::Retrieval(_) => "retrieval",
            Self::RetrievalEmpty => "retrieval_empty",
            Self::GenerationFailure(_) => "generation_failure",
            Self::GenerationTimeout(_) => "generation_timeout",
        }
    }
}

impl From<AnswerError> for QuestionError {
    fn from(error: AnswerError) -> Self {
        match error {
            AnswerError::NoContext => Self::RetrievalEmpty,
            AnswerError::Generation(inner) => Self::GenerationFailure(inner),
            AnswerError::TimedOut(timeout) => Self::GenerationTimeout(timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_errors_map_to_upload_kinds() {
        assert_eq!(UploadError::from(BuildError::NoChunks).kind(), "no_extractable_text");
        let embedding = BuildError::Embedding(EmbeddingClientError::GenerationFailed("x".into()));
        assert_eq!(UploadError::from(embedding).kind(), "embedding_failure");
        let mismatch = BuildError::CountMismatch {
            expected: 2,
            actual: 1,
        };
        assert_eq!(UploadError::from(mismatch).kind(), "build");
    }

    #[test]
    fn answer_errors_map_to_question_kinds() {
        assert_eq!(QuestionError::from(AnswerError::NoContext).kind(), "retrieval_empty");
        assert_eq!(
            QuestionError::from(AnswerError::TimedOut(Duration::from_secs(1))).kind(),
            "generation_timeout"
        );
        let failed = AnswerError::Generation(GenerationClientError::GenerationFailed("x".into()));
        assert_eq!(QuestionError::from(failed).kind(), "generation_failure");
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(SessionState::Processing).expect("json"),
            serde_json::json!("processing")
        );
    }
}
