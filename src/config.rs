use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub graph: GraphConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    #[serde(default)]
    pub rerank: Option<RerankConfig>,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// SQLite file backing the knowledge graph.
    pub path: PathBuf,
}

/// Segmentation bounds. `overlap_chars` must stay below `max_chars`; the
/// loader and the chunker constructor both reject violations.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

fn default_overlap_chars() -> usize {
    200
}
fn default_min_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Final number of context blocks to deliver.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum similarity for a candidate to enter the funnel.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// Candidate multiplier applied when a re-ranker is configured: the
    /// initial search requests `top_k × funnel_factor` candidates.
    #[serde(default = "default_funnel_factor")]
    pub funnel_factor: usize,
    /// Context budget in whitespace-delimited units.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    /// Question tokens shorter than this never become graph keywords.
    #[serde(default = "default_min_keyword_len")]
    pub min_keyword_len: usize,
    /// Upper bound on graph facts appended to a hybrid context.
    #[serde(default = "default_max_graph_facts")]
    pub max_graph_facts: usize,
    /// Graph rows fetched per keyword before fact dedup.
    #[serde(default = "default_facts_per_keyword")]
    pub facts_per_keyword: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
            funnel_factor: default_funnel_factor(),
            context_budget: default_context_budget(),
            min_keyword_len: default_min_keyword_len(),
            max_graph_facts: default_max_graph_facts(),
            facts_per_keyword: default_facts_per_keyword(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.30
}
fn default_funnel_factor() -> usize {
    4
}
fn default_context_budget() -> usize {
    800
}
fn default_min_keyword_len() -> usize {
    4
}
fn default_max_graph_facts() -> usize {
    10
}
fn default_facts_per_keyword() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Embedding sidecar base URL (serves `/embed`).
    pub url: String,
    /// Fixed embedding dimensionality; every returned vector is checked.
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// Qdrant base URL.
    pub url: String,
    pub collection: String,
    #[serde(default = "default_upsert_batch")]
    pub upsert_batch: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upsert_batch() -> usize {
    100
}

/// Optional re-ranking sidecar. Absence disables the funnel and re-ranking;
/// presence never makes it a hard dependency (failures degrade to
/// similarity ordering).
#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// Re-rank sidecar base URL (serves `/rerank`).
    pub url: String,
    #[serde(default = "default_rerank_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_rerank_timeout_secs() -> u64 {
    10
}

/// Optional inference sidecar used for knowledge-fact extraction.
#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Inference sidecar base URL (serves `/generate`).
    pub url: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_workers() -> usize {
    4
}
fn default_inference_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking contract: violations fail here, never silently corrected.
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!(
            "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.funnel_factor == 0 {
        anyhow::bail!("retrieval.funnel_factor must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.score_threshold) {
        anyhow::bail!("retrieval.score_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.context_budget == 0 {
        anyhow::bail!("retrieval.context_budget must be >= 1");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be >= 1");
    }

    if let Some(inference) = &config.inference {
        if inference.workers == 0 {
            anyhow::bail!("inference.workers must be >= 1");
        }
    }

    Ok(())
}
