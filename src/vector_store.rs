//! Vector index abstraction and backends.
//!
//! The [`VectorIndex`] trait covers the two operations the pipeline needs:
//! idempotent upserts of embedded chunks and nearest-neighbor search. The
//! production backend is [`QdrantIndex`] over the Qdrant REST API; the
//! [`MemoryIndex`] backend is brute-force cosine similarity for tests and
//! offline use.
//!
//! Responses cross the boundary through explicit serde schemas — a payload
//! missing a required field is rejected with a descriptive error rather than
//! patched up at the call site.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

use crate::config::VectorConfig;
use crate::embedding::cosine_similarity;
use crate::models::{EmbeddedChunk, RetrievalCandidate};

/// Stored alongside each point; returned verbatim by search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub chunk_id: String,
    pub page_number: u32,
    pub text: String,
    pub source_name: String,
}

/// Append/idempotent-upsert vector storage with similarity search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the backing collection when missing. Idempotent.
    async fn ensure_collection(&self) -> Result<()>;

    /// Upsert embedded chunks. Point ids derive from chunk ids, so
    /// re-ingesting identical content overwrites in place.
    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Nearest-neighbor search, ranked by similarity descending. Candidates
    /// below `score_threshold` are excluded.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalCandidate>>;
}

// ============ Qdrant backend ============

#[derive(Debug, Serialize)]
struct UpsertPoint<'a> {
    id: String,
    vector: &'a [f32],
    payload: ChunkPayload,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: ChunkPayload,
}

/// Vector index backed by a Qdrant instance's REST API.
pub struct QdrantIndex {
    client: reqwest::Client,
    url: String,
    collection: String,
    dims: usize,
    upsert_batch: usize,
}

impl QdrantIndex {
    pub fn new(config: &VectorConfig, dims: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            dims,
            upsert_batch: config.upsert_batch.max(1),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.url, self.collection)
    }

    /// Deterministic point id: chunk ids are SHA-256 hex, Qdrant wants a
    /// UUID, so derive a v5 UUID from the chunk id.
    fn point_id(chunk_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<()> {
        let existing = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .with_context(|| format!("Vector store unreachable at {}", self.url))?;

        if existing.status().is_success() {
            return Ok(());
        }
        if existing.status().as_u16() != 404 {
            let body = existing.text().await.unwrap_or_default();
            bail!("Vector store error while checking collection: {}", body);
        }

        let body = serde_json::json!({
            "vectors": { "size": self.dims, "distance": "Cosine" }
        });
        let response = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Failed to create collection ({}): {}", status, body);
        }
        Ok(())
    }

    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        // Reject bad dimensions before any write reaches the store.
        for chunk in chunks {
            if chunk.vector.len() != self.dims {
                bail!(
                    "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                    chunk.chunk.chunk_id,
                    self.dims,
                    chunk.vector.len()
                );
            }
        }

        for batch in chunks.chunks(self.upsert_batch) {
            let points: Vec<UpsertPoint> = batch
                .iter()
                .map(|c| UpsertPoint {
                    id: Self::point_id(&c.chunk.chunk_id),
                    vector: &c.vector,
                    payload: ChunkPayload {
                        chunk_id: c.chunk.chunk_id.clone(),
                        page_number: c.chunk.page_number,
                        text: c.chunk.text.clone(),
                        source_name: c.chunk.source_name.clone(),
                    },
                })
                .collect();

            let response = self
                .client
                .put(format!("{}/points?wait=true", self.collection_url()))
                .json(&serde_json::json!({ "points": points }))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bail!("Vector upsert failed ({}): {}", status, body);
            }
        }

        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalCandidate>> {
        if vector.len() != self.dims {
            bail!(
                "Query vector dimension mismatch: expected {}, got {}",
                self.dims,
                vector.len()
            );
        }

        let body = serde_json::json!({
            "vector": vector,
            "limit": top_k,
            "score_threshold": score_threshold,
            "with_payload": true,
        });

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Vector store unreachable at {}", self.url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Vector search failed ({}): {}", status, body);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Malformed vector search response: {}", e))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|point| RetrievalCandidate {
                chunk_id: point.payload.chunk_id,
                page_number: point.payload.page_number,
                text: point.payload.text,
                source_name: point.payload.source_name,
                similarity_score: point.score,
                rerank_score: None,
            })
            .collect())
    }
}

// ============ In-memory backend ============

/// Brute-force in-memory index for tests and offline runs.
pub struct MemoryIndex {
    dims: usize,
    points: RwLock<Vec<EmbeddedChunk>>,
}

impl MemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            points: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        for chunk in chunks {
            if chunk.vector.len() != self.dims {
                bail!(
                    "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                    chunk.chunk.chunk_id,
                    self.dims,
                    chunk.vector.len()
                );
            }
        }

        let mut points = self.points.write().unwrap();
        for chunk in chunks {
            points.retain(|p| p.chunk.chunk_id != chunk.chunk.chunk_id);
            points.push(chunk.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalCandidate>> {
        if vector.len() != self.dims {
            bail!(
                "Query vector dimension mismatch: expected {}, got {}",
                self.dims,
                vector.len()
            );
        }

        let points = self.points.read().unwrap();
        let mut candidates: Vec<RetrievalCandidate> = points
            .iter()
            .map(|p| RetrievalCandidate {
                chunk_id: p.chunk.chunk_id.clone(),
                page_number: p.chunk.page_number,
                text: p.chunk.text.clone(),
                source_name: p.chunk.source_name.clone(),
                similarity_score: cosine_similarity(vector, &p.vector),
                rerank_score: None,
            })
            .filter(|c| c.similarity_score >= score_threshold)
            .collect();

        candidates.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_k);
        Ok(candidates)
    }
}
