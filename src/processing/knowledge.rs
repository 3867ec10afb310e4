//! In-memory knowledge base: chunk texts, their embeddings, and top-k cosine search.
//!
//! A knowledge base is built in one shot and never mutated afterwards. Building is
//! all-or-nothing; any failed or inconsistent embedding batch aborts the whole build.

use super::types::{BuildError, BuildOptions, RetrievedChunk, SearchError};
use crate::embedding::{self, EmbeddingClient};
use futures_util::{StreamExt, TryStreamExt, stream};

#[derive(Debug, Clone)]
struct IndexedChunk {
    text: String,
    embedding: Vec<f32>,
}

/// Immutable collection of embedded chunks supporting similarity search.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entries: Vec<IndexedChunk>,
    dimension: usize,
}

impl KnowledgeBase {
    /// Embed every chunk and assemble a knowledge base.
    ///
    /// Chunks are grouped into batches of `options.batch_size`; at most `options.concurrency`
    /// batches are in flight, and each batch is bounded by `options.timeout`. Vectors are stored
    /// in chunk order regardless of completion order.
    pub async fn build(
        chunks: Vec<String>,
        embedder: &dyn EmbeddingClient,
        options: BuildOptions,
    ) -> Result<Self, BuildError> {
        if chunks.is_empty() {
            return Err(BuildError::NoChunks);
        }

        let batch_size = options.batch_size.max(1);
        let concurrency = options.concurrency.max(1);
        let timeout = options.timeout;
        let batches: Vec<Vec<String>> = chunks
            .chunks(batch_size)
            .map(<[String]>::to_vec)
            .collect();
        tracing::debug!(
            chunks = chunks.len(),
            batches = batches.len(),
            concurrency,
            "Embedding chunks"
        );

        let embedded: Vec<Vec<Vec<f32>>> = stream::iter(batches.into_iter().map(move |batch| {
            let expected = batch.len();
            async move {
                let vectors =
                    embedding::with_timeout(timeout, embedder.generate_embeddings(batch)).await?;
                if vectors.len() != expected {
                    return Err(BuildError::CountMismatch {
                        expected,
                        actual: vectors.len(),
                    });
                }
                Ok(vectors)
            }
        }))
        .buffered(concurrency)
        .try_collect()
        .await?;

        let vectors: Vec<Vec<f32>> = embedded.into_iter().flatten().collect();
        let dimension = validate_dimensions(&vectors, options.expected_dimension)?;

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(text, embedding)| IndexedChunk { text, embedding })
            .collect();

        Ok(Self { entries, dimension })
    }

    /// Return the `k` chunks most similar to `query`, best first.
    ///
    /// Always returns `min(k, len)` results; no similarity threshold is applied. Equal scores
    /// keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, SearchError> {
        if k == 0 {
            return Err(SearchError::InvalidLimit);
        }
        if query.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let score = cosine_similarity(query, &entry.embedding);
                (index, if score.is_nan() { f32::MIN } else { score })
            })
            .collect();
        // Stable sort: ties stay in insertion order.
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(index, score)| RetrievedChunk {
                index,
                text: self.entries[index].text.clone(),
                score,
            })
            .collect())
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the knowledge base holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimension shared by every stored vector.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Stored chunk texts in insertion order.
    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.text.as_str())
    }
}

fn validate_dimensions(vectors: &[Vec<f32>], expected: Option<usize>) -> Result<usize, BuildError> {
    let first = vectors.first().map(Vec::len).unwrap_or_default();
    if first == 0 {
        return Err(BuildError::EmptyEmbedding);
    }
    let dimension = expected.unwrap_or(first);
    for vector in vectors {
        if vector.is_empty() {
            return Err(BuildError::EmptyEmbedding);
        }
        if vector.len() != dimension {
            return Err(BuildError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
    }
    Ok(dimension)
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClientError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Embeds known texts to fixed vectors; unknown texts fail.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|(text, vector)| (text.to_string(), vector.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for TableEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            texts
                .iter()
                .map(|text| {
                    self.table.get(text).cloned().ok_or_else(|| {
                        EmbeddingClientError::GenerationFailed(format!("unknown text {text}"))
                    })
                })
                .collect()
        }
    }

    fn options(batch_size: usize) -> BuildOptions {
        BuildOptions {
            batch_size,
            concurrency: 2,
            expected_dimension: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn sample_embedder() -> TableEmbedder {
        TableEmbedder::new(&[
            ("alpha", vec![1.0, 0.0, 0.0]),
            ("beta", vec![0.0, 1.0, 0.0]),
            ("gamma", vec![0.7, 0.7, 0.0]),
            ("alpha twin", vec![2.0, 0.0, 0.0]),
            ("delta", vec![0.0, 0.0, 1.0]),
        ])
    }

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn build_preserves_chunk_order_across_batches() {
        let embedder = sample_embedder();
        let kb = KnowledgeBase::build(
            texts(&["alpha", "beta", "gamma", "alpha twin", "delta"]),
            &embedder,
            options(2),
        )
        .await
        .expect("kb");

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(kb.len(), 5);
        assert_eq!(kb.dimension(), 3);
        assert_eq!(
            kb.chunks().collect::<Vec<_>>(),
            vec!["alpha", "beta", "gamma", "alpha twin", "delta"]
        );
    }

    /// Tracks how many calls are in flight at once; optionally never answers.
    struct InFlightEmbedder {
        current: AtomicUsize,
        peak: AtomicUsize,
        stall: bool,
    }

    impl InFlightEmbedder {
        fn new(stall: bool) -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                stall,
            }
        }
    }

    #[async_trait]
    impl EmbeddingClient for InFlightEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn build_bounds_concurrent_batches() {
        let embedder = InFlightEmbedder::new(false);
        let chunks: Vec<String> = (0..12).map(|i| format!("chunk {i}")).collect();
        let build_options = BuildOptions {
            concurrency: 3,
            ..options(1)
        };
        let kb = KnowledgeBase::build(chunks, &embedder, build_options)
            .await
            .expect("kb");

        assert_eq!(kb.len(), 12);
        let peak = embedder.peak.load(Ordering::SeqCst);
        assert!(peak <= build_options.concurrency, "peak {peak} exceeds bound");
        assert!(peak > 1, "batches never overlapped");
    }

    #[tokio::test]
    async fn stalled_batch_fails_the_build() {
        let embedder = InFlightEmbedder::new(true);
        let build_options = BuildOptions {
            timeout: Duration::from_millis(50),
            ..options(2)
        };
        let error = KnowledgeBase::build(texts(&["alpha", "beta"]), &embedder, build_options)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            BuildError::Embedding(EmbeddingClientError::TimedOut(_))
        ));
    }

    #[tokio::test]
    async fn build_rejects_empty_input() {
        let embedder = sample_embedder();
        let error = KnowledgeBase::build(Vec::new(), &embedder, options(2))
            .await
            .unwrap_err();
        assert!(matches!(error, BuildError::NoChunks));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn build_is_all_or_nothing() {
        let embedder = sample_embedder();
        let error = KnowledgeBase::build(texts(&["alpha", "mystery"]), &embedder, options(1))
            .await
            .unwrap_err();
        assert!(matches!(error, BuildError::Embedding(_)));
    }

    #[tokio::test]
    async fn build_rejects_inconsistent_dimensions() {
        let embedder = TableEmbedder::new(&[("a", vec![1.0, 0.0]), ("b", vec![1.0])]);
        let error = KnowledgeBase::build(texts(&["a", "b"]), &embedder, options(4))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            BuildError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));

        let configured = BuildOptions {
            expected_dimension: Some(3),
            ..options(4)
        };
        let error = KnowledgeBase::build(texts(&["a"]), &embedder, configured)
            .await
            .unwrap_err();
        assert!(matches!(error, BuildError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn search_ranks_by_similarity_with_stable_ties() {
        let embedder = sample_embedder();
        let kb = KnowledgeBase::build(
            texts(&["beta", "alpha", "gamma", "alpha twin", "delta"]),
            &embedder,
            options(16),
        )
        .await
        .expect("kb");

        let hits = kb.search(&[1.0, 0.0, 0.0], 3).expect("hits");
        let order: Vec<&str> = hits.iter().map(|hit| hit.text.as_str()).collect();
        assert_eq!(order, vec!["alpha", "alpha twin", "gamma"]);
        assert_eq!(hits[0].index, 1);
        assert!((hits[0].score - hits[1].score).abs() < 1e-6);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));

        let again = kb.search(&[1.0, 0.0, 0.0], 3).expect("hits");
        assert_eq!(hits, again);
    }

    #[tokio::test]
    async fn search_returns_min_of_k_and_len_without_threshold() {
        let embedder = sample_embedder();
        let kb = KnowledgeBase::build(texts(&["alpha", "beta"]), &embedder, options(16))
            .await
            .expect("kb");

        let hits = kb.search(&[0.0, 0.0, 1.0], 10).expect("hits");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.score.abs() < 1e-6));
        assert_eq!(hits[0].text, "alpha");

        assert_eq!(kb.search(&[0.0, 0.0, 1.0], 1).expect("hits").len(), 1);
    }

    #[tokio::test]
    async fn search_validates_inputs() {
        let embedder = sample_embedder();
        let kb = KnowledgeBase::build(texts(&["alpha"]), &embedder, options(16))
            .await
            .expect("kb");

        assert!(matches!(kb.search(&[1.0, 0.0, 0.0], 0), Err(SearchError::InvalidLimit)));
        assert!(matches!(
            kb.search(&[1.0], 1),
            Err(SearchError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
