//! Language-model capability used by the answer engine.
//!
//! Adapters issue HTTP requests directly to the provider, the same way the embedding adapters
//! do. All of them are non-streaming: the full completion is returned in one response.

use crate::config::{Config, GenerationProvider};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

const USER_AGENT: &str = "rusty-rag/generation";

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider was unreachable or rejected the credentials.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Request payload passed to the language model.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Fully assembled prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Token budget for the completion.
    pub max_tokens: u32,
}

/// Interface implemented by language-model backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a completion for the supplied prompt.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError>;

    /// Default sampling parameters configured for this client.
    fn defaults(&self) -> GenerationDefaults {
        GenerationDefaults::default()
    }
}

/// Sampling parameters applied when the caller does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    /// Sampling temperature.
    pub temperature: f32,
    /// Token budget.
    pub max_tokens: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1000,
        }
    }
}

/// Build a generation client based on configuration.
pub fn build_generation_client(
    config: &Config,
) -> Result<Arc<dyn GenerationClient>, GenerationClientError> {
    let defaults = GenerationDefaults {
        temperature: config.generation_temperature,
        max_tokens: config.generation_max_tokens,
    };
    tracing::debug!(
        provider = ?config.generation_provider,
        model = %config.generation_model,
        "Building generation client"
    );
    let client: Arc<dyn GenerationClient> = match config.generation_provider {
        GenerationProvider::HuggingFace => Arc::new(HuggingFaceGenerationClient {
            http: build_http_client()?,
            base_url: normalize(&config.huggingface_url),
            api_token: config.huggingface_api_token.clone().unwrap_or_default(),
            model: config.generation_model.clone(),
            defaults,
        }),
        GenerationProvider::Ollama => Arc::new(OllamaGenerationClient {
            http: build_http_client()?,
            base_url: normalize(&config.ollama_url),
            model: config.generation_model.clone(),
            defaults,
        }),
        GenerationProvider::OpenAI => Arc::new(OpenAIGenerationClient {
            http: build_http_client()?,
            base_url: normalize(&config.openai_url),
            api_key: config.openai_api_key.clone().unwrap_or_default(),
            model: config.generation_model.clone(),
            defaults,
        }),
    };
    Ok(client)
}

fn normalize(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

fn build_http_client() -> Result<Client, GenerationClientError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|error| {
            GenerationClientError::ProviderUnavailable(format!(
                "failed to construct HTTP client: {error}"
            ))
        })
}

async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    provider: &str,
) -> Result<T, GenerationClientError> {
    let response = request.send().await.map_err(|error| {
        GenerationClientError::ProviderUnavailable(format!("failed to reach {provider}: {error}"))
    })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::UNAUTHORIZED {
        return Err(GenerationClientError::ProviderUnavailable(format!(
            "{provider} returned {status}"
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationClientError::GenerationFailed(format!(
            "{provider} returned {status}: {body}"
        )));
    }

    response.json::<T>().await.map_err(|error| {
        GenerationClientError::InvalidResponse(format!(
            "failed to decode {provider} response: {error}"
        ))
    })
}

struct HuggingFaceGenerationClient {
    http: Client,
    base_url: String,
    api_token: String,
    model: String,
    defaults: GenerationDefaults,
}

#[derive(Debug, Deserialize)]
struct HuggingFaceGeneration {
    generated_text: String,
}

#[async_trait]
impl GenerationClient for HuggingFaceGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        let payload = json!({
            "inputs": request.prompt,
            "parameters": {
                "temperature": request.temperature,
                "max_new_tokens": request.max_tokens,
                "return_full_text": false,
            },
            "options": { "wait_for_model": true }
        });
        let http_request = self
            .http
            .post(format!("{}/models/{}", self.base_url, self.model))
            .bearer_auth(&self.api_token)
            .json(&payload);
        let body: Vec<HuggingFaceGeneration> = send_json(http_request, "Hugging Face").await?;
        body.into_iter()
            .next()
            .map(|generation| generation.generated_text.trim().to_string())
            .ok_or_else(|| {
                GenerationClientError::InvalidResponse("Hugging Face returned no generations".into())
            })
    }

    fn defaults(&self) -> GenerationDefaults {
        self.defaults
    }
}

struct OllamaGenerationClient {
    http: Client,
    base_url: String,
    model: String,
    defaults: GenerationDefaults,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        let payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });
        let http_request = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload);
        let body: OllamaResponse = send_json(http_request, "Ollama").await?;

        if !body.done {
            return Err(GenerationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }

    fn defaults(&self) -> GenerationDefaults {
        self.defaults
    }
}

struct OpenAIGenerationClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    defaults: GenerationDefaults,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl GenerationClient for OpenAIGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let http_request = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload);
        let body: ChatCompletion = send_json(http_request, "OpenAI").await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| GenerationClientError::InvalidResponse("OpenAI returned no choices".into()))
    }

    fn defaults(&self) -> GenerationDefaults {
        self.defaults
    }
}
