//! Core data models used throughout Recall Harness.
//!
//! These types represent the pages, chunks, and retrieval results that flow
//! through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};

/// Raw text of one source page, before cleaning.
#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-based page number within the source document.
    pub page_number: u32,
    pub text: String,
    pub char_count: usize,
}

impl PageText {
    pub fn new(page_number: u32, text: String) -> Self {
        let char_count = text.chars().count();
        Self {
            page_number,
            text,
            char_count,
        }
    }
}

/// Text of one page after normalization. Immutable input to segmentation.
#[derive(Debug, Clone)]
pub struct CleanedPageText {
    pub page_number: u32,
    pub text: String,
    pub original_char_count: usize,
    pub cleaned_char_count: usize,
}

/// A bounded, contiguous unit of document text — the atomic retrieval item.
///
/// `chunk_id` is a SHA-256 hash of `(source_name, page_number, text)`, so
/// identical input always yields the identical id: re-ingestion is idempotent
/// and ids are stable across restarts. `char_count` is the Unicode scalar
/// count of `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub chunk_id: String,
    pub page_number: u32,
    pub text: String,
    pub char_count: usize,
    pub source_name: String,
}

/// A chunk paired with its embedding vector, ready for the vector index.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: TextChunk,
    pub vector: Vec<f32>,
}

/// A candidate returned from vector search for a single query.
///
/// Transient: produced per query, never persisted. `rerank_score` is set
/// only when a re-ranking collaborator scored the candidate.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    pub page_number: u32,
    pub text: String,
    pub source_name: String,
    pub similarity_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
}

impl RetrievalCandidate {
    /// The score the candidate is currently ranked by: rerank score when
    /// present, raw similarity otherwise.
    pub fn ranking_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.similarity_score)
    }
}

/// A subject/relation/object triple read back from the graph store.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
pub struct KnowledgeFact {
    pub subject: String,
    pub relation: String,
    pub object: String,
    pub source_doc: String,
    pub page_number: u32,
}

/// A named entity extracted from chunk text.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A directed relation between two entities.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Relation {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

/// Entities and relations extracted from a single chunk of text.
#[derive(Debug, Clone, Default)]
pub struct ExtractedGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl ExtractedGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}
