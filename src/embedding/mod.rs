//! Embedding capability and provider adapters.
//!
//! The pipeline only sees [`EmbeddingClient`]; concrete backends live in [`remote`] (Hugging
//! Face, Ollama, OpenAI over HTTP) and here ([`HashEmbeddingClient`], a deterministic offline
//! encoder useful for tests and air-gapped demos).

pub mod remote;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use remote::{HuggingFaceEmbeddingClient, OllamaEmbeddingClient, OpenAIEmbeddingClient};

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or refused the request outright.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider did not answer within the configured limit.
    #[error("Embedding request timed out after {0:?}")]
    TimedOut(Duration),
}

/// Run `request` with an upper bound, mapping expiry to [`EmbeddingClientError::TimedOut`].
pub async fn with_timeout<T, F>(timeout: Duration, request: F) -> Result<T, EmbeddingClientError>
where
    F: Future<Output = Result<T, EmbeddingClientError>>,
{
    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| EmbeddingClientError::TimedOut(timeout))?
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one embedding vector per supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Embed a single text, typically a user question.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        self.generate_embeddings(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                EmbeddingClientError::InvalidResponse("provider returned no vectors".into())
            })
    }
}

/// Deterministic embedding client that hashes bytes into a fixed number of slots.
///
/// Vectors are L2-normalized, so cosine similarity reflects shared byte content. It needs no
/// network access and never fails for non-empty input.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct a hashing client producing vectors of `dimension` slots.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }
}

/// Build the embedding client selected by configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        "Building embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbeddingClient::new(
            config.embedding_dimension.unwrap_or(384),
        )),
        EmbeddingProvider::HuggingFace => Arc::new(HuggingFaceEmbeddingClient::new(
            &config.huggingface_url,
            config.huggingface_api_token.clone().unwrap_or_default(),
            &config.embedding_model,
        )?),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            &config.ollama_url,
            &config.embedding_model,
        )?),
        EmbeddingProvider::OpenAI => Arc::new(OpenAIEmbeddingClient::new(
            &config.openai_url,
            config.openai_api_key.clone().unwrap_or_default(),
            &config.embedding_model,
        )?),
    };
    Ok(client)
}
