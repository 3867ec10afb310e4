//! Per-session orchestration of the retrieval pipeline.
//!
//! A session owns at most one [`KnowledgeBase`]. Uploads are serialized through an async
//! mutex and build a fresh knowledge base before swapping it in; questions take an `Arc`
//! snapshot of the current one and run concurrently with each other and with a rebuild.

mod registry;
pub mod types;

pub use registry::SessionRegistry;
pub use types::{
    DocumentSummary, QuestionError, ServiceInitError, SessionState, SessionStatus,
    SkippedDocument, UploadError, UploadOutcome,
};

use crate::config::{Config, PipelineSettings};
use crate::embedding::{self, EmbeddingClient, build_embedding_client};
use crate::extraction::{PdfTextExtractor, TextExtractor, UploadedDocument};
use crate::generation::{GenerationClient, build_generation_client};
use crate::metrics::PipelineMetrics;
use crate::processing::{self, Answer, BuildOptions, KnowledgeBase, chunk_text, join_pages};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Provider handles and settings shared by every session.
pub struct PipelineServices {
    /// Chunking, retrieval, and timeout settings.
    pub settings: PipelineSettings,
    /// Embedding provider used for chunks and questions.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Language model used to answer questions.
    pub generator: Arc<dyn GenerationClient>,
    /// Document text extractor.
    pub extractor: Arc<dyn TextExtractor>,
    /// Process-wide counters.
    pub metrics: PipelineMetrics,
}

impl PipelineServices {
    /// Bundle providers with the default PDF extractor.
    pub fn new(
        settings: PipelineSettings,
        embedder: Arc<dyn EmbeddingClient>,
        generator: Arc<dyn GenerationClient>,
    ) -> Self {
        Self {
            settings,
            embedder,
            generator,
            extractor: Arc::new(PdfTextExtractor),
            metrics: PipelineMetrics::new(),
        }
    }

    /// Replace the text extractor.
    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Build providers and settings from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ServiceInitError> {
        Ok(Self::new(
            config.pipeline_settings(),
            build_embedding_client(config)?,
            build_generation_client(config)?,
        ))
    }
}

#[derive(Default)]
struct SessionContents {
    knowledge: Option<Arc<KnowledgeBase>>,
    documents: Vec<DocumentSummary>,
}

/// One user's conversation context: uploaded documents and the knowledge base built from them.
pub struct Session {
    id: Uuid,
    created_at: OffsetDateTime,
    opened: Instant,
    last_used_ms: AtomicU64,
    services: Arc<PipelineServices>,
    contents: RwLock<SessionContents>,
    processing: AtomicBool,
    upload_gate: Mutex<()>,
}

/// Clears the processing flag when an upload ends, including on cancellation.
struct ProcessingFlag<'a>(&'a AtomicBool);

impl<'a> ProcessingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ProcessingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct BuiltKnowledge {
    knowledge: KnowledgeBase,
    documents: Vec<DocumentSummary>,
    skipped: Vec<SkippedDocument>,
    pages: usize,
}

impl Session {
    /// Create an empty session.
    pub fn new(services: Arc<PipelineServices>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
            opened: Instant::now(),
            last_used_ms: AtomicU64::new(0),
            services,
            contents: RwLock::new(SessionContents::default()),
            processing: AtomicBool::new(false),
            upload_gate: Mutex::new(()),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Time since the last upload or question started or finished.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_used_ms.load(Ordering::SeqCst));
        self.opened.elapsed().saturating_sub(last)
    }

    /// Whether an upload is currently being processed.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.opened.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_used_ms.fetch_max(elapsed, Ordering::SeqCst);
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        if self.processing.load(Ordering::SeqCst) {
            return SessionState::Processing;
        }
        if self.contents.read().await.knowledge.is_some() {
            SessionState::Ready
        } else {
            SessionState::Empty
        }
    }

    /// Snapshot of state, documents, and chunk count.
    pub async fn status(&self) -> SessionStatus {
        let state = self.state().await;
        let contents = self.contents.read().await;
        SessionStatus {
            session_id: self.id,
            state,
            created_at: self
                .created_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| self.created_at.unix_timestamp().to_string()),
            documents: contents.documents.clone(),
            chunks: contents.knowledge.as_ref().map_or(0, |kb| kb.len()),
        }
    }

    /// Process `documents` into a new knowledge base, replacing the current one.
    ///
    /// Requests that fail validation (no files, non-PDF files, a concurrent upload) leave the
    /// session untouched. Once processing starts, any failure drops the previous knowledge base
    /// and returns the session to [`SessionState::Empty`].
    pub async fn upload(
        &self,
        documents: Vec<UploadedDocument>,
    ) -> Result<UploadOutcome, UploadError> {
        self.touch();
        let result = self.upload_inner(documents).await;
        self.touch();
        match &result {
            Ok(outcome) => {
                self.services
                    .metrics
                    .record_upload(outcome.documents.len() as u64, outcome.chunks as u64);
            }
            Err(error) => {
                self.services.metrics.record_upload_failure();
                tracing::warn!(session = %self.id, kind = error.kind(), error = %error, "Upload failed");
            }
        }
        result
    }

    async fn upload_inner(
        &self,
        documents: Vec<UploadedDocument>,
    ) -> Result<UploadOutcome, UploadError> {
        if documents.is_empty() {
            return Err(UploadError::NoDocuments);
        }
        if let Some(document) = documents.iter().find(|document| !document.is_pdf()) {
            return Err(UploadError::UnsupportedDocument {
                filename: document.filename.clone(),
                content_type: document
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "unknown".into()),
            });
        }

        let _gate = self
            .upload_gate
            .try_lock()
            .map_err(|_| UploadError::UploadInProgress)?;
        let _flag = ProcessingFlag::raise(&self.processing);
        tracing::info!(session = %self.id, documents = documents.len(), "Processing upload");

        match self.build_knowledge(documents).await {
            Ok(built) => {
                let outcome = UploadOutcome {
                    documents: built.documents.clone(),
                    skipped: built.skipped,
                    pages: built.pages,
                    chunks: built.knowledge.len(),
                };
                let mut contents = self.contents.write().await;
                contents.knowledge = Some(Arc::new(built.knowledge));
                contents.documents = built.documents;
                tracing::info!(
                    session = %self.id,
                    documents = outcome.documents.len(),
                    skipped = outcome.skipped.len(),
                    pages = outcome.pages,
                    chunks = outcome.chunks,
                    "Knowledge base ready"
                );
                Ok(outcome)
            }
            Err(error) => {
                let mut contents = self.contents.write().await;
                *contents = SessionContents::default();
                Err(error)
            }
        }
    }

    async fn build_knowledge(
        &self,
        documents: Vec<UploadedDocument>,
    ) -> Result<BuiltKnowledge, UploadError> {
        let extractor = Arc::clone(&self.services.extractor);
        let extracted = tokio::task::spawn_blocking(move || {
            documents
                .into_iter()
                .map(|document| {
                    let pages = extractor.extract(&document.bytes);
                    (document.filename.clone(), document.fingerprint(), pages)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|error| UploadError::Internal(error.to_string()))?;

        let mut summaries = Vec::new();
        let mut skipped = Vec::new();
        let mut page_texts = Vec::new();
        for (filename, fingerprint, pages) in extracted {
            match pages {
                Ok(pages) => {
                    tracing::debug!(
                        session = %self.id,
                        filename = %filename,
                        fingerprint = %fingerprint,
                        pages = pages.len(),
                        "Extracted document"
                    );
                    summaries.push(DocumentSummary {
                        filename,
                        pages: pages.len(),
                        fingerprint,
                    });
                    page_texts.extend(pages);
                }
                Err(error) => {
                    tracing::warn!(session = %self.id, filename = %filename, error = %error, "Skipping unreadable document");
                    skipped.push(SkippedDocument {
                        filename,
                        reason: error.to_string(),
                    });
                }
            }
        }

        if summaries.is_empty() {
            let reasons = skipped
                .iter()
                .map(|document| format!("{}: {}", document.filename, document.reason))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(UploadError::DocumentUnreadable(reasons));
        }

        let text = join_pages(&page_texts);
        if text.trim().is_empty() {
            return Err(UploadError::NoExtractableText);
        }

        let settings = &self.services.settings;
        let chunks = chunk_text(&text, settings.chunk_size, settings.chunk_overlap)?;
        let options = BuildOptions {
            batch_size: settings.embedding_batch_size,
            concurrency: settings.embedding_concurrency,
            expected_dimension: settings.embedding_dimension,
            timeout: settings.embedding_timeout,
        };
        let knowledge =
            KnowledgeBase::build(chunks, self.services.embedder.as_ref(), options).await?;

        Ok(BuiltKnowledge {
            knowledge,
            documents: summaries,
            skipped,
            pages: page_texts.len(),
        })
    }

    /// Answer `question` from the current knowledge base.
    ///
    /// Failures never modify the knowledge base or the session state.
    pub async fn ask(&self, question: &str) -> Result<Answer, QuestionError> {
        self.touch();
        let result = self.ask_inner(question).await;
        self.touch();
        match &result {
            Ok(answer) => {
                self.services.metrics.record_answer();
                tracing::info!(session = %self.id, sources = answer.sources.len(), "Question answered");
            }
            Err(error) => {
                self.services.metrics.record_question_failure();
                tracing::warn!(session = %self.id, kind = error.kind(), error = %error, "Question failed");
            }
        }
        result
    }

    async fn ask_inner(&self, question: &str) -> Result<Answer, QuestionError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QuestionError::EmptyQuestion);
        }

        let knowledge = self
            .contents
            .read()
            .await
            .knowledge
            .clone()
            .ok_or(QuestionError::NotReady)?;
        if knowledge.is_empty() {
            return Err(QuestionError::RetrievalEmpty);
        }

        let query = embedding::with_timeout(
            self.services.settings.embedding_timeout,
            self.services.embedder.embed_query(question),
        )
        .await
        .map_err(QuestionError::EmbeddingFailure)?;
        let retrieved = knowledge.search(&query, self.services.settings.top_k)?;
        tracing::debug!(session = %self.id, retrieved = retrieved.len(), "Retrieved context");

        let answer = processing::answer(
            question,
            retrieved,
            self.services.generator.as_ref(),
            self.services.settings.generation_timeout,
        )
        .await?;
        Ok(answer)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by session and API tests.

    use super::*;
    use crate::embedding::{EmbeddingClientError, HashEmbeddingClient};
    use crate::extraction::ExtractionError;
    use crate::generation::{GenerationClientError, GenerationRequest};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Treats bytes as UTF-8 with pages separated by form feeds; `BAD` prefixes are unreadable.
    pub struct PlainTextExtractor;

    impl TextExtractor for PlainTextExtractor {
        fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
            if bytes.starts_with(b"BAD") {
                return Err(ExtractionError::Unreadable("bad header".into()));
            }
            let text = String::from_utf8_lossy(bytes);
            if text.is_empty() {
                return Ok(Vec::new());
            }
            Ok(text.split('\x0c').map(str::to_string).collect())
        }
    }

    /// Hash embedder that blocks on texts containing `SLOW` until released.
    ///
    /// With `stall` set, every call hangs forever.
    pub struct GatedEmbedder {
        pub inner: HashEmbeddingClient,
        pub release: Notify,
        pub fail: AtomicBool,
        pub stall: AtomicBool,
    }

    impl GatedEmbedder {
        pub fn new() -> Self {
            Self {
                inner: HashEmbeddingClient::new(32),
                release: Notify::new(),
                fail: AtomicBool::new(false),
                stall: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for GatedEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EmbeddingClientError::ProviderUnavailable("offline".into()));
            }
            if self.stall.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if texts.iter().any(|text| text.contains("SLOW")) {
                self.release.notified().await;
            }
            self.inner.generate_embeddings(texts).await
        }
    }

    /// Echoes the number of prompts seen; optionally stalls on selected calls.
    pub struct ScriptedGenerator {
        pub calls: AtomicUsize,
        pub stall_first: bool,
        pub fail: AtomicBool,
    }

    impl ScriptedGenerator {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                stall_first: false,
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedGenerator {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<String, GenerationClientError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(GenerationClientError::GenerationFailed("model overloaded".into()));
            }
            if self.stall_first && call == 0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            let chunks = request.prompt.matches("\n\n").count();
            Ok(format!("answer #{call} from {chunks} blocks"))
        }
    }

    pub fn settings() -> PipelineSettings {
        PipelineSettings {
            chunk_size: 40,
            chunk_overlap: 5,
            top_k: 2,
            embedding_batch_size: 2,
            embedding_concurrency: 2,
            embedding_dimension: None,
            generation_timeout: Duration::from_millis(100),
            embedding_timeout: Duration::from_millis(500),
            session_idle_timeout: Duration::from_secs(60),
        }
    }

    pub fn services(
        embedder: Arc<GatedEmbedder>,
        generator: Arc<ScriptedGenerator>,
    ) -> Arc<PipelineServices> {
        Arc::new(
            PipelineServices::new(settings(), embedder, generator)
                .with_extractor(Arc::new(PlainTextExtractor)),
        )
    }

    pub fn pdf(name: &str, body: &str) -> UploadedDocument {
        UploadedDocument::new(name, Some("application/pdf".into()), body.as_bytes().to_vec())
    }
}
