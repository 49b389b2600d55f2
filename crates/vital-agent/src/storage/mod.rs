//! Hosted vector store client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RetrievalConfig;
use crate::error::StoreError;
use crate::types::{RetrievedPassage, VectorRecord};

/// The vector collection boundary. Upserts are idempotent by record ID;
/// queries return at most `top_k` hits by decreasing similarity (ties broken
/// by the store's insertion order — accepted nondeterminism).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, StoreError>;

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, StoreError>;
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    records: &'a [VectorRecord],
}

#[derive(Deserialize)]
struct UpsertResponse {
    upserted: usize,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    matches: Vec<RetrievedPassage>,
}

/// JSON-over-HTTP client for the hosted collection. No local caching — a
/// read always hits the service.
pub struct RemoteVectorStore {
    client: Client,
    base_url: String,
    api_key: String,
    collection: String,
}

impl RemoteVectorStore {
    pub fn new(config: &RetrievalConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.store_endpoint.trim_end_matches('/').to_string(),
            api_key: config.store_api_key.clone(),
            collection: config.collection.clone(),
        })
    }

    fn url(&self, op: &str) -> String {
        format!("{}/collections/{}/{}", self.base_url, self.collection, op)
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        request: &Req,
    ) -> Result<Resp, StoreError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), message });
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl VectorIndex for RemoteVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let response: UpsertResponse = self
            .post_json(&self.url("upsert"), &UpsertRequest { records: &records })
            .await?;
        tracing::debug!(count = response.upserted, collection = %self.collection, "vectors upserted");
        Ok(response.upserted)
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, StoreError> {
        let response: QueryResponse = self
            .post_json(&self.url("query"), &QueryRequest { vector, top_k })
            .await?;
        Ok(response.matches)
    }
}
