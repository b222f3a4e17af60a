//! Re-ranking collaborator client.
//!
//! Second-pass relevance scoring of an initial candidate set by a
//! query-aware cross-encoder behind the sidecar's `/rerank` endpoint. The
//! retrieval engine treats this as a best-effort refinement: any failure
//! here (timeout, transport error, malformed response) degrades the query
//! to similarity ordering instead of failing it.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::RerankConfig;

/// Scores documents against a query; one score per document, same order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// Re-ranking client backed by the sidecar's cross-encoder.
///
/// Carries its own timeout: a slow re-ranker must never stall the query
/// pipeline past the configured bound.
pub struct HttpReranker {
    client: reqwest::Client,
    url: String,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "query": query,
            "documents": documents,
        });

        let response = self
            .client
            .post(format!("{}/rerank", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            bail!("Rerank sidecar error {}: {}", status, body_text);
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Malformed rerank response: {}", e))?;

        if parsed.scores.len() != documents.len() {
            bail!(
                "Rerank sidecar returned {} scores for {} documents",
                parsed.scores.len(),
                documents.len()
            );
        }

        Ok(parsed.scores)
    }
}
