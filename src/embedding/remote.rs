//! HTTP embedding adapters for hosted and local providers.

use super::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

const USER_AGENT: &str = "rusty-rag/embedding";

fn build_http_client() -> Result<Client, EmbeddingClientError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|error| {
            EmbeddingClientError::ProviderUnavailable(format!(
                "failed to construct HTTP client: {error}"
            ))
        })
}

/// Send a request and decode a JSON body, mapping transport and status failures.
async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    provider: &str,
) -> Result<T, EmbeddingClientError> {
    let response = request.send().await.map_err(|error| {
        EmbeddingClientError::ProviderUnavailable(format!("failed to reach {provider}: {error}"))
    })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::UNAUTHORIZED {
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingClientError::ProviderUnavailable(format!(
            "{provider} returned {status}: {body}"
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingClientError::GenerationFailed(format!(
            "{provider} returned {status}: {body}"
        )));
    }

    response.json::<T>().await.map_err(|error| {
        EmbeddingClientError::InvalidResponse(format!(
            "failed to decode {provider} response: {error}"
        ))
    })
}

fn ensure_count(
    vectors: Vec<Vec<f32>>,
    expected: usize,
    provider: &str,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    if vectors.len() != expected {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "{provider} returned {} vectors for {expected} inputs",
            vectors.len()
        )));
    }
    Ok(vectors)
}

/// Hugging Face Inference API client using the feature-extraction pipeline.
pub struct HuggingFaceEmbeddingClient {
    http: Client,
    base_url: String,
    api_token: String,
    model: String,
}

impl HuggingFaceEmbeddingClient {
    /// Create a client for `model` hosted behind `base_url`.
    pub fn new(
        base_url: &str,
        api_token: String,
        model: &str,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/pipeline/feature-extraction/{}",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl EmbeddingClient for HuggingFaceEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = texts.len();
        tracing::debug!(model = %self.model, batch = expected, "Requesting Hugging Face embeddings");
        let payload = json!({
            "inputs": texts,
            "options": { "wait_for_model": true }
        });
        let request = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .json(&payload);
        let vectors: Vec<Vec<f32>> = send_json(request, "Hugging Face").await?;
        ensure_count(vectors, expected, "Hugging Face")
    }
}

/// Ollama client using the batch `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingClient {
    /// Create a client for a local Ollama runtime.
    pub fn new(base_url: &str, model: &str) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = texts.len();
        tracing::debug!(model = %self.model, batch = expected, "Requesting Ollama embeddings");
        let payload = json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&payload);
        let body: OllamaEmbedResponse = send_json(request, "Ollama").await?;
        ensure_count(body.embeddings, expected, "Ollama")
    }
}

/// OpenAI embeddings API client.
pub struct OpenAIEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbeddingClient {
    /// Create a client for the OpenAI-compatible API at `base_url`.
    pub fn new(base_url: &str, api_key: String, model: &str) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let expected = texts.len();
        tracing::debug!(model = %self.model, batch = expected, "Requesting OpenAI embeddings");
        let payload = json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload);
        let mut body: OpenAIEmbeddingResponse = send_json(request, "OpenAI").await?;
        // The API documents `index` but does not promise ordering.
        body.data.sort_by_key(|item| item.index);
        let vectors = body.data.into_iter().map(|item| item.embedding).collect();
        ensure_count(vectors, expected, "OpenAI")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn huggingface_client_posts_feature_extraction_batch() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2")
                    .header("authorization", "Bearer hf_test");
                then.status(200).json_body(json!([[0.1, 0.2], [0.3, 0.4]]));
            })
            .await;

        let client = HuggingFaceEmbeddingClient::new(
            &server.base_url(),
            "hf_test".into(),
            "sentence-transformers/all-MiniLM-L6-v2",
        )
        .expect("client");
        let vectors = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .expect("vectors");

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn ollama_client_decodes_embed_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200)
                    .json_body(json!({ "model": "nomic", "embeddings": [[1.0, 0.0, 0.0]] }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(&server.base_url(), "nomic").expect("client");
        let vector = client.embed_query("hello").await.expect("vector");
        assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn openai_client_restores_input_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }));
            })
            .await;

        let client = OpenAIEmbeddingClient::new(&server.base_url(), "sk-test".into(), "small")
            .expect("client");
        let vectors = client
            .generate_embeddings(vec!["first".into(), "second".into()])
            .await
            .expect("vectors");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn server_errors_surface_as_generation_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(500).body("model exploded");
            })
            .await;

        let client = OllamaEmbeddingClient::new(&server.base_url(), "nomic").expect("client");
        let error = client
            .generate_embeddings(vec!["hello".into()])
            .await
            .unwrap_err();
        assert!(
            matches!(error, EmbeddingClientError::GenerationFailed(message) if message.contains("500"))
        );
    }

    #[tokio::test]
    async fn short_responses_are_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[1.0]] }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(&server.base_url(), "nomic").expect("client");
        let error = client
            .generate_embeddings(vec!["a".into(), "b".into()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingClientError::InvalidResponse(_)));
    }
}
