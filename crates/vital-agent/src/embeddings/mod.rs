//! Batched remote embeddings.
//!
//! The embedding API takes at most 10 input strings per call, so segment
//! lists are cut into consecutive chunks and re-assembled in order. A failed
//! batch never abandons the document: the report names exactly which
//! segments got vectors and which did not, so retries stay narrow.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{EmbeddingConfig, EMBEDDING_API_MAX_BATCH};
use crate::error::EmbeddingError;
use crate::types::Segment;

/// The embedding API boundary, mockable in tests.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed up to [`EMBEDDING_API_MAX_BATCH`] texts, one vector per input,
    /// in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// The dimensionality this backend produces.
    fn dimension(&self) -> usize;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
}

/// JSON-over-HTTP embedding client with a bound on concurrent outstanding
/// calls, so bulk ingestion cannot trample the provider's rate limits.
pub struct RemoteEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    inflight: Semaphore,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            inflight: Semaphore::new(config.max_inflight),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.len() > EMBEDDING_API_MAX_BATCH {
            return Err(EmbeddingError::Api(format!(
                "batch of {} exceeds API limit of {}",
                texts.len(),
                EMBEDDING_API_MAX_BATCH
            )));
        }

        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|_| EmbeddingError::Network("embedding client shut down".into()))?;

        let request = EmbedRequest { model: &self.model, input: texts, dimensions: self.dimension };
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("HTTP {}: {}", status, body)));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Api(format!("unreadable response: {}", e)))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// A segment whose batch call failed, paired with the cause.
#[derive(Debug)]
pub struct FailedSegment {
    pub segment: Segment,
    pub error: String,
}

/// Outcome of embedding a segment list: embedded segments in their original
/// order, plus the failed remainder.
#[derive(Debug, Default)]
pub struct EmbeddingReport {
    pub embedded: Vec<Segment>,
    pub failed: Vec<FailedSegment>,
}

/// Groups segments into API-sized batches and attaches the returned vectors.
pub struct EmbeddingBatcher {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    dimension: usize,
}

impl std::fmt::Debug for EmbeddingBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingBatcher")
            .field("batch_size", &self.batch_size)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl EmbeddingBatcher {
    /// Fails fast when the configured dimension disagrees with the backend —
    /// a mismatch must never silently truncate vectors.
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        batch_size: usize,
        dimension: usize,
    ) -> Result<Self, EmbeddingError> {
        if backend.dimension() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                got: backend.dimension(),
            });
        }
        let batch_size = batch_size.clamp(1, EMBEDDING_API_MAX_BATCH);
        Ok(Self { backend, batch_size, dimension })
    }

    /// Embed `segments`, issuing `ceil(N / batch_size)` API calls in order.
    /// The trailing partial batch is processed like any other. Segments in
    /// a failed batch land in `failed` with the error; the rest keep their
    /// original relative order in `embedded`.
    pub async fn embed_segments(&self, segments: Vec<Segment>) -> EmbeddingReport {
        let mut report = EmbeddingReport::default();

        for batch in chunk_owned(segments, self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            match self.backend.embed(&texts).await {
                Ok(vectors) => {
                    if vectors.len() != batch.len() {
                        let error = EmbeddingError::CountMismatch {
                            expected: batch.len(),
                            got: vectors.len(),
                        }
                        .to_string();
                        report.extend_failed(batch, &error);
                        continue;
                    }
                    match self.check_dimensions(&vectors) {
                        Ok(()) => {
                            for (mut segment, vector) in batch.into_iter().zip(vectors) {
                                segment.embedding = Some(vector);
                                report.embedded.push(segment);
                            }
                        }
                        Err(e) => report.extend_failed(batch, &e.to_string()),
                    }
                }
                Err(e) => {
                    tracing::warn!(batch_len = texts.len(), error = %e, "embedding batch failed");
                    report.extend_failed(batch, &e.to_string());
                }
            }
        }

        report
    }

    /// Embed a single query string (a one-item batch).
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.backend.embed(&[query.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch { expected: 1, got: 0 })?;
        if vector.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(vector)
    }

    fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
        for v in vectors {
            if v.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    got: v.len(),
                });
            }
        }
        Ok(())
    }
}

impl EmbeddingReport {
    fn extend_failed(&mut self, batch: Vec<Segment>, error: &str) {
        for segment in batch {
            self.failed.push(FailedSegment { segment, error: error.to_string() });
        }
    }
}

/// Consecutive owned chunks of at most `size` items. The final chunk may be
/// shorter and is always produced.
fn chunk_owned(items: Vec<Segment>, size: usize) -> Vec<Vec<Segment>> {
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and returns constant vectors; optionally fails one batch.
    struct CountingBackend {
        calls: AtomicUsize,
        dimension: usize,
        fail_call: Option<usize>,
    }

    impl CountingBackend {
        fn new(dimension: usize) -> Self {
            Self { calls: AtomicUsize::new(0), dimension, fail_call: None }
        }

        fn failing_on(dimension: usize, call: usize) -> Self {
            Self { calls: AtomicUsize::new(0), dimension, fail_call: Some(call) }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_call == Some(call) {
                return Err(EmbeddingError::Api("synthetic batch failure".into()));
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    fn segments(n: usize) -> Vec<Segment> {
        (0..n).map(|i| Segment::new("/docs/a.txt", i, format!("segment {}", i))).collect()
    }

    async fn run(n: usize) -> (usize, EmbeddingReport) {
        let backend = Arc::new(CountingBackend::new(8));
        let batcher = EmbeddingBatcher::new(backend.clone(), 10, 8).unwrap();
        let report = batcher.embed_segments(segments(n)).await;
        (backend.calls.load(Ordering::SeqCst), report)
    }

    #[tokio::test]
    async fn empty_input_makes_zero_calls() {
        let (calls, report) = run(0).await;
        assert_eq!(calls, 0);
        assert!(report.embedded.is_empty());
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn exact_batch_is_one_call() {
        let (calls, report) = run(10).await;
        assert_eq!(calls, 1);
        assert_eq!(report.embedded.len(), 10);
    }

    #[tokio::test]
    async fn eleven_segments_take_two_calls() {
        let (calls, report) = run(11).await;
        assert_eq!(calls, 2);
        assert_eq!(report.embedded.len(), 11);
        // original order survives re-assembly
        let indices: Vec<usize> = report.embedded.iter().map(|s| s.index).collect();
        assert_eq!(indices, (0..11).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn trailing_partial_batch_is_processed() {
        let (calls, report) = run(23).await;
        assert_eq!(calls, 3);
        assert_eq!(report.embedded.len(), 23);
        assert!(report.embedded.iter().all(|s| s.embedding.is_some()));
    }

    #[tokio::test]
    async fn one_failed_batch_reports_only_its_segments() {
        let backend = Arc::new(CountingBackend::failing_on(8, 1));
        let batcher = EmbeddingBatcher::new(backend, 10, 8).unwrap();
        let report = batcher.embed_segments(segments(25)).await;

        // second batch (indices 10..20) failed, the rest embedded
        assert_eq!(report.embedded.len(), 15);
        assert_eq!(report.failed.len(), 10);
        let failed_indices: Vec<usize> = report.failed.iter().map(|f| f.segment.index).collect();
        assert_eq!(failed_indices, (10..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_fast_at_construction() {
        let backend = Arc::new(CountingBackend::new(512));
        let err = EmbeddingBatcher::new(backend, 10, 1024).unwrap_err();
        assert!(matches!(err, EmbeddingError::DimensionMismatch { expected: 1024, got: 512 }));
    }

    #[tokio::test]
    async fn query_embedding_is_single_item_batch() {
        let backend = Arc::new(CountingBackend::new(8));
        let batcher = EmbeddingBatcher::new(backend.clone(), 10, 8).unwrap();
        let vector = batcher.embed_query("BMI正常范围是多少").await.unwrap();
        assert_eq!(vector.len(), 8);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
