//! Core data types and error definitions for the retrieval pipeline.

use crate::embedding::EmbeddingClientError;
use crate::generation::GenerationClientError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while turning joined page text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunk size of zero cannot make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for new characters in every window.
    #[error("chunk overlap {overlap} must be smaller than chunk size {size}")]
    OverlapTooLarge {
        /// Requested overlap.
        overlap: usize,
        /// Requested chunk size.
        size: usize,
    },
}

/// Errors emitted while building a knowledge base.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Nothing to index.
    #[error("no chunks to index")]
    NoChunks,
    /// Embedding provider failed for at least one batch.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Provider returned a different number of vectors than inputs.
    #[error("embedding provider returned {actual} vectors for {expected} chunks")]
    CountMismatch {
        /// Number of chunks submitted.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },
    /// Provider returned a zero-length vector.
    #[error("embedding provider returned an empty vector")]
    EmptyEmbedding,
    /// Vectors within one build disagree on dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the first vector (or the configured dimension).
        expected: usize,
        /// Offending dimension.
        actual: usize,
    },
}

/// Errors emitted by similarity search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// `k` must be at least one.
    #[error("search limit must be greater than zero")]
    InvalidLimit,
    /// Query vector does not match the knowledge base dimension.
    #[error("query embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the stored embeddings.
        expected: usize,
        /// Dimension of the query embedding.
        actual: usize,
    },
}

/// Errors emitted by the answer engine.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// No retrieved context was supplied.
    #[error("no context available to answer the question")]
    NoContext,
    /// The language model call failed.
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationClientError),
    /// The language model did not answer in time.
    #[error("generation timed out after {0:?}")]
    TimedOut(Duration),
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// Position of the chunk in insertion order.
    pub index: usize,
    /// Chunk text.
    pub text: String,
    /// Cosine similarity against the query.
    pub score: f32,
}

/// A generated answer together with the context it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Generated answer text.
    pub text: String,
    /// Retrieved chunks in ranking order.
    pub sources: Vec<RetrievedChunk>,
}

/// Options applied while building a knowledge base.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Chunks per embedding request.
    pub batch_size: usize,
    /// Concurrent embedding requests.
    pub concurrency: usize,
    /// Dimension every vector must have, when known up front.
    pub expected_dimension: Option<usize>,
    /// Upper bound on a single embedding batch request.
    pub timeout: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            batch_size: 16,
            concurrency: 4,
            expected_dimension: None,
            timeout: Duration::from_secs(60),
        }
    }
}
