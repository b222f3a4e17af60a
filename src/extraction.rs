//! Knowledge-fact extraction from chunk text.
//!
//! Sends chunk text to the inference sidecar with a structured-extraction
//! prompt and parses the completion into typed entities and relations.
//! Extraction is best-effort by contract: any failure — transport, refusal,
//! malformed JSON — yields an empty graph and never fails the pipeline.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::InferenceConfig;
use crate::models::{Entity, ExtractedGraph, Relation};

const EXTRACTION_PROMPT: &str = "\
You are a knowledge extraction system.

Task: from the provided TEXT, extract a knowledge graph.

Mandatory rules:
- Answer ONLY with valid JSON.
- Do NOT write explanations.
- Do NOT use markdown.
- Do NOT add text before or after the JSON.

Exact response format:
{
  \"entities\": [
    {\"name\": \"string\", \"type\": \"Person|Place|Project|Concept|Date|Organization\"}
  ],
  \"relations\": [
    {\"subject\": \"string\", \"relation\": \"string\", \"object\": \"string\"}
  ]
}

Semantic rules:
- Normalize names (e.g. \"Alan Turing\", never pronouns).
- Use clear verbs for relations (e.g. \"created\", \"worked_on\").
- Never invent entities that are not in the text.";

/// Text-completion collaborator used for extraction.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, text: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    answer: String,
}

/// Inference client backed by the sidecar's `/generate` endpoint.
///
/// Calls are serialized through a single logical execution slot: the local
/// model behind the sidecar handles one request at a time, and callers must
/// not assume parallel inference throughput.
pub struct HttpInferenceClient {
    client: reqwest::Client,
    url: String,
    slot: Mutex<()>,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            slot: Mutex::new(()),
        })
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn complete(&self, system_prompt: &str, text: &str) -> Result<String> {
        let _slot = self.slot.lock().await;

        let body = serde_json::json!({
            "system": system_prompt,
            "prompt": text,
        });

        let response = self
            .client
            .post(format!("{}/generate", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            bail!("Inference sidecar error {}: {}", status, body_text);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Malformed inference response: {}", e))?;

        Ok(parsed.answer)
    }
}

/// Extracts typed entity/relation graphs from raw chunk text.
pub struct FactExtractor {
    inference: Arc<dyn InferenceClient>,
}

impl FactExtractor {
    pub fn new(inference: Arc<dyn InferenceClient>) -> Self {
        Self { inference }
    }

    /// Extract a graph from one chunk. Always returns a valid graph; every
    /// failure mode collapses to an empty one.
    pub async fn extract(&self, text: &str) -> ExtractedGraph {
        if text.trim().is_empty() {
            return ExtractedGraph::default();
        }

        match self.inference.complete(EXTRACTION_PROMPT, text).await {
            Ok(raw) => parse_completion(&raw).unwrap_or_default(),
            Err(_) => ExtractedGraph::default(),
        }
    }
}

/// Salvage and parse the JSON object from a raw completion.
///
/// Models wrap JSON in prose often enough that we cut from the first `{` to
/// the last `}` before parsing. Individually malformed entries are skipped;
/// only an unparseable document is an error.
fn parse_completion(raw: &str) -> Result<ExtractedGraph> {
    let start = raw
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("No JSON object in completion"))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("No JSON object in completion"))?;
    if end < start {
        bail!("No JSON object in completion");
    }

    #[derive(Deserialize)]
    struct RawGraph {
        #[serde(default)]
        entities: Vec<serde_json::Value>,
        #[serde(default)]
        relations: Vec<serde_json::Value>,
    }

    let parsed: RawGraph = serde_json::from_str(&raw[start..=end])?;

    let entities: Vec<Entity> = parsed
        .entities
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect();
    let relations: Vec<Relation> = parsed
        .relations
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect();

    Ok(ExtractedGraph {
        entities,
        relations,
    })
}
