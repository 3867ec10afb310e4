use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
const DEFAULT_GENERATION_MODEL: &str = "tiiuae/falcon-7b";
const DEFAULT_HASH_DIMENSION: usize = 384;
const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_CHUNK_OVERLAP: usize = 20;
const DEFAULT_TOP_K: usize = 4;
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 16;
const DEFAULT_EMBEDDING_CONCURRENCY: usize = 4;
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_IDLE_SECS: u64 = 60 * 60;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Default Hugging Face Inference API base URL.
pub const DEFAULT_HUGGINGFACE_URL: &str = "https://api-inference.huggingface.co";
/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
/// Default local Ollama runtime URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Rusty RAG server and CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Embedding provider used to vectorize chunks and questions.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Expected dimensionality of the produced vectors, when known up front.
    pub embedding_dimension: Option<usize>,
    /// Number of chunks sent to the provider per request.
    pub embedding_batch_size: usize,
    /// Maximum number of embedding requests in flight while building a knowledge base.
    pub embedding_concurrency: usize,
    /// Upper bound on a single embedding request, in seconds.
    pub embedding_timeout_secs: u64,
    /// Language-model backend used to answer questions.
    pub generation_provider: GenerationProvider,
    /// Language-model identifier passed to the provider.
    pub generation_model: String,
    /// Sampling temperature for answers.
    pub generation_temperature: f32,
    /// Token budget for a single answer.
    pub generation_max_tokens: u32,
    /// Upper bound on a single language-model call, in seconds.
    pub generation_timeout_secs: u64,
    /// Hugging Face Inference API token.
    pub huggingface_api_token: Option<String>,
    /// Hugging Face Inference API base URL.
    pub huggingface_url: String,
    /// OpenAI API key.
    pub openai_api_key: Option<String>,
    /// OpenAI API base URL.
    pub openai_url: String,
    /// Ollama runtime base URL.
    pub ollama_url: String,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved for each question.
    pub retrieval_top_k: usize,
    /// Maximum accepted upload request size in bytes.
    pub max_upload_bytes: usize,
    /// Sessions untouched for this many seconds are evicted.
    pub session_idle_secs: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Hosted Hugging Face Inference API (feature-extraction pipeline).
    HuggingFace,
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic offline hashing embedder.
    Hash,
}

/// Supported language-model backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    /// Hosted Hugging Face Inference API (text-generation task).
    HuggingFace,
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI chat completions API.
    OpenAI,
}

/// Tuning knobs injected into every session's pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Chunks per embedding request.
    pub embedding_batch_size: usize,
    /// Concurrent embedding requests during a build.
    pub embedding_concurrency: usize,
    /// Dimension every embedding must have, when configured.
    pub embedding_dimension: Option<usize>,
    /// Timeout applied to every language-model call.
    pub generation_timeout: Duration,
    /// Timeout applied to every embedding request.
    pub embedding_timeout: Duration,
    /// Idle period after which a session is evicted from the registry.
    pub session_idle_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            embedding_concurrency: DEFAULT_EMBEDDING_CONCURRENCY,
            embedding_dimension: None,
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
            embedding_timeout: Duration::from_secs(DEFAULT_EMBEDDING_TIMEOUT_SECS),
            session_idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let embedding_provider = match load_env_optional("EMBEDDING_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))?,
            None => EmbeddingProvider::HuggingFace,
        };
        let generation_provider = match load_env_optional("GENERATION_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("GENERATION_PROVIDER".into()))?,
            None => GenerationProvider::HuggingFace,
        };

        let mut embedding_dimension = parse_optional::<usize>("EMBEDDING_DIMENSION")?;
        if embedding_provider == EmbeddingProvider::Hash && embedding_dimension.is_none() {
            embedding_dimension = Some(DEFAULT_HASH_DIMENSION);
        }

        let config = Self {
            embedding_provider,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimension,
            embedding_batch_size: parse_optional("EMBEDDING_BATCH_SIZE")?
                .unwrap_or(DEFAULT_EMBEDDING_BATCH_SIZE),
            embedding_concurrency: parse_optional("EMBEDDING_CONCURRENCY")?
                .unwrap_or(DEFAULT_EMBEDDING_CONCURRENCY),
            embedding_timeout_secs: parse_optional("EMBEDDING_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_EMBEDDING_TIMEOUT_SECS),
            generation_provider,
            generation_model: load_env_optional("GENERATION_MODEL")
                .unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string()),
            generation_temperature: parse_optional("GENERATION_TEMPERATURE")?
                .unwrap_or(DEFAULT_TEMPERATURE),
            generation_max_tokens: parse_optional("GENERATION_MAX_TOKENS")?
                .unwrap_or(DEFAULT_MAX_TOKENS),
            generation_timeout_secs: parse_optional("GENERATION_TIMEOUT_SECS")?
                .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SECS),
            huggingface_api_token: load_env_optional("HUGGINGFACEHUB_API_TOKEN"),
            huggingface_url: load_env_optional("HUGGINGFACE_URL")
                .unwrap_or_else(|| DEFAULT_HUGGINGFACE_URL.to_string()),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_url: load_env_optional("OPENAI_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?
                .unwrap_or(DEFAULT_CHUNK_OVERLAP),
            retrieval_top_k: parse_optional("RETRIEVAL_TOP_K")?.unwrap_or(DEFAULT_TOP_K),
            max_upload_bytes: parse_optional("MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            session_idle_secs: parse_optional("SESSION_IDLE_SECS")?
                .unwrap_or(DEFAULT_SESSION_IDLE_SECS),
            server_port: parse_optional("SERVER_PORT")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants and provider credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("TEXT_SPLITTER_CHUNK_SIZE".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidValue(
                "TEXT_SPLITTER_CHUNK_OVERLAP (must be smaller than the chunk size)".into(),
            ));
        }
        if self.retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue("RETRIEVAL_TOP_K".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_BATCH_SIZE".into()));
        }
        if self.embedding_concurrency == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_CONCURRENCY".into()));
        }
        if self.embedding_dimension == Some(0) {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if self.generation_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("GENERATION_TIMEOUT_SECS".into()));
        }
        if self.embedding_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_TIMEOUT_SECS".into()));
        }
        if self.session_idle_secs == 0 {
            return Err(ConfigError::InvalidValue("SESSION_IDLE_SECS".into()));
        }

        let needs_huggingface = self.embedding_provider == EmbeddingProvider::HuggingFace
            || self.generation_provider == GenerationProvider::HuggingFace;
        if needs_huggingface && self.huggingface_api_token.is_none() {
            return Err(ConfigError::MissingVariable(
                "HUGGINGFACEHUB_API_TOKEN".into(),
            ));
        }
        let needs_openai = self.embedding_provider == EmbeddingProvider::OpenAI
            || self.generation_provider == GenerationProvider::OpenAI;
        if needs_openai && self.openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }
        Ok(())
    }

    /// Extract the pipeline settings injected into sessions.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.retrieval_top_k,
            embedding_batch_size: self.embedding_batch_size,
            embedding_concurrency: self.embedding_concurrency,
            embedding_dimension: self.embedding_dimension,
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            embedding_timeout: Duration::from_secs(self.embedding_timeout_secs),
            session_idle_timeout: Duration::from_secs(self.session_idle_secs),
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
///
/// Returns the cached configuration if it was already initialised.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        generation_provider = ?config.generation_provider,
        generation_model = %config.generation_model,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        top_k = config.retrieval_top_k,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        embedding_provider: EmbeddingProvider::Hash,
        embedding_model: "hash".into(),
        embedding_dimension: Some(64),
        embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        embedding_concurrency: DEFAULT_EMBEDDING_CONCURRENCY,
        embedding_timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
        generation_provider: GenerationProvider::Ollama,
        generation_model: "llama3".into(),
        generation_temperature: DEFAULT_TEMPERATURE,
        generation_max_tokens: DEFAULT_MAX_TOKENS,
        generation_timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
        huggingface_api_token: None,
        huggingface_url: DEFAULT_HUGGINGFACE_URL.into(),
        openai_api_key: None,
        openai_url: DEFAULT_OPENAI_URL.into(),
        ollama_url: DEFAULT_OLLAMA_URL.into(),
        chunk_size: DEFAULT_CHUNK_SIZE,
        chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        retrieval_top_k: DEFAULT_TOP_K,
        max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        session_idle_secs: DEFAULT_SESSION_IDLE_SECS,
        server_port: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!(
            "HuggingFace".parse::<EmbeddingProvider>(),
            Ok(EmbeddingProvider::HuggingFace)
        );
        assert_eq!("hash".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::Hash));
        assert_eq!(
            " OpenAI ".parse::<GenerationProvider>(),
            Ok(GenerationProvider::OpenAI)
        );
        assert!("hash".parse::<GenerationProvider>().is_err());
    }

    #[test]
    fn validate_rejects_overlap_not_smaller_than_chunk_size() {
        let mut config = test_config();
        config.chunk_size = 10;
        config.chunk_overlap = 10;
        let error = config.validate().unwrap_err();
        assert!(matches!(error, ConfigError::InvalidValue(key) if key.contains("OVERLAP")));
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = test_config();
        config.generation_timeout_secs = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue(key) if key == "GENERATION_TIMEOUT_SECS"
        ));

        let mut config = test_config();
        config.embedding_timeout_secs = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue(key) if key == "EMBEDDING_TIMEOUT_SECS"
        ));

        let mut config = test_config();
        config.session_idle_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_provider_credentials() {
        let mut config = test_config();
        config.generation_provider = GenerationProvider::HuggingFace;
        let error = config.validate().unwrap_err();
        assert!(
            matches!(error, ConfigError::MissingVariable(key) if key == "HUGGINGFACEHUB_API_TOKEN")
        );

        config.huggingface_api_token = Some("hf_token".into());
        assert!(config.validate().is_ok());

        config.embedding_provider = EmbeddingProvider::OpenAI;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::MissingVariable(key) if key == "OPENAI_API_KEY"
        ));
    }

    #[test]
    fn pipeline_settings_mirror_config() {
        let mut config = test_config();
        config.retrieval_top_k = 7;
        config.generation_timeout_secs = 3;
        config.embedding_timeout_secs = 2;
        config.session_idle_secs = 90;
        let settings = config.pipeline_settings();
        assert_eq!(settings.chunk_size, 500);
        assert_eq!(settings.chunk_overlap, 20);
        assert_eq!(settings.top_k, 7);
        assert_eq!(settings.generation_timeout, Duration::from_secs(3));
        assert_eq!(settings.embedding_timeout, Duration::from_secs(2));
        assert_eq!(settings.session_idle_timeout, Duration::from_secs(90));
        assert_eq!(settings.embedding_dimension, Some(64));
        assert_eq!(PipelineSettings::default().top_k, 4);
    }
}
