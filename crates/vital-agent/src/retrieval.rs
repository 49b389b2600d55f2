//! Query-time retrieval: vectorize the question, ask the store.

use std::sync::Arc;

use crate::embeddings::EmbeddingBatcher;
use crate::error::RetrievalError;
use crate::storage::VectorIndex;
use crate::types::RetrievedPassage;

pub struct Retriever {
    batcher: Arc<EmbeddingBatcher>,
    store: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(batcher: Arc<EmbeddingBatcher>, store: Arc<dyn VectorIndex>) -> Self {
        Self { batcher, store }
    }

    /// Return up to `k` passages ranked by decreasing similarity. The query
    /// goes through the same embedding pipeline as documents (a one-item
    /// batch). `k == 0` is a caller error; a collection smaller than `k`
    /// simply returns fewer passages.
    pub async fn retrieve(
        &self,
        user_query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        if k == 0 {
            return Err(RetrievalError::InvalidTopK(k));
        }

        let query_vector = self.batcher.embed_query(user_query).await?;
        let passages = self.store.query(&query_vector, k).await?;

        tracing::debug!(query = %user_query, k, hits = passages.len(), "retrieval complete");
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingBackend;
    use crate::error::{EmbeddingError, StoreError};
    use crate::types::VectorRecord;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubBackend;

    #[async_trait]
    impl EmbeddingBackend for StubBackend {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    /// Serves a fixed set of passages, truncated to the requested k.
    struct StubStore {
        passages: Vec<RetrievedPassage>,
    }

    #[async_trait]
    impl VectorIndex for StubStore {
        async fn upsert(&self, _records: Vec<VectorRecord>) -> Result<usize, StoreError> {
            Ok(0)
        }
        async fn query(
            &self,
            _vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<RetrievedPassage>, StoreError> {
            Ok(self.passages.iter().take(top_k).cloned().collect())
        }
    }

    fn passage(text: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage { text: text.to_string(), score, metadata: HashMap::new() }
    }

    fn retriever(passages: Vec<RetrievedPassage>) -> Retriever {
        let batcher =
            Arc::new(EmbeddingBatcher::new(Arc::new(StubBackend), 10, 4).unwrap());
        Retriever::new(batcher, Arc::new(StubStore { passages }))
    }

    #[tokio::test]
    async fn zero_k_is_a_validation_error() {
        let r = retriever(vec![]);
        let err = r.retrieve("低盐饮食的好处", 0).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidTopK(0)));
    }

    #[tokio::test]
    async fn short_collection_is_not_an_error() {
        let r = retriever(vec![passage("a", 0.9), passage("b", 0.8)]);
        let hits = r.retrieve("anything", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn k_bounds_the_result() {
        let r = retriever(vec![passage("a", 0.9), passage("b", 0.8), passage("c", 0.7)]);
        let hits = r.retrieve("anything", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }
}
