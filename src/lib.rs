//! # Recall Harness
//!
//! A local-first document ingestion and retrieval-augmented context
//! assembly engine.
//!
//! Recall Harness turns heterogeneous documents (PDFs, notes, audio
//! transcripts) into retrievable chunks, indexes them for semantic search,
//! and assembles a bounded, citation-annotated context block for a
//! downstream answer generator. Entity/relation facts extracted from chunks
//! land in a local knowledge graph and can be fused into query results.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────┐   ┌────────┐
//! │  Sources  │──▶│ Clean+Chunk  │──▶│ Embed   │──▶│ Qdrant │
//! │ PDF/notes │   │ (overlapped) │   │(sidecar)│   └───┬────┘
//! └───────────┘   └──────┬───────┘   └─────────┘       │
//!                        │ fact workers                │ search
//!                        ▼                             ▼
//!                  ┌──────────┐                 ┌─────────────┐
//!                  │  SQLite  │────────────────▶│ QueryEngine │──▶ context
//!                  │  graph   │   hybrid fuse   │ (+rerank)   │
//!                  └──────────┘                 └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rcl init                          # create graph db + vector collection
//! rcl ingest                       # chunk, embed, and index sources
//! rcl query "what changed in Q3?"  # assemble context for a question
//! rcl query "what changed?" --hybrid
//! rcl facts turing                 # inspect the knowledge graph
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`cleaner`] | Page text normalization |
//! | [`chunker`] | Overlap-aware segmentation engine |
//! | [`embedding`] | Embedding collaborator |
//! | [`vector_store`] | Vector index backends |
//! | [`graph_store`] | SQLite knowledge graph |
//! | [`rerank`] | Re-ranking collaborator |
//! | [`retrieval`] | Query and context assembly |
//! | [`extraction`] | Knowledge-fact extraction |
//! | [`workers`] | Bounded extraction worker pool |
//! | [`ingest`] | Pipeline orchestration |
//! | [`events`] | Pipeline event reporting |

pub mod chunker;
pub mod cleaner;
pub mod config;
pub mod db;
pub mod embedding;
pub mod events;
pub mod extraction;
pub mod graph_store;
pub mod ingest;
pub mod models;
pub mod rerank;
pub mod retrieval;
pub mod sources;
pub mod vector_store;
pub mod workers;

pub use chunker::Chunker;
pub use retrieval::{QueryEngine, QueryOutcome};
