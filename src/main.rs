//! # Recall Harness CLI (`rcl`)
//!
//! The `rcl` binary drives the ingestion and retrieval pipeline. It provides
//! commands for initializing the local stores, ingesting source documents,
//! querying for assembled context, and inspecting the knowledge graph.
//!
//! ## Usage
//!
//! ```bash
//! rcl --config ./config/recall.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rcl init` | Create the graph database schema and the vector collection |
//! | `rcl ingest` | Chunk, embed, and index every document under the sources root |
//! | `rcl query "<question>"` | Assemble budget-bounded, cited context for a question |
//! | `rcl facts <keyword>` | Look up knowledge-graph relations by keyword |

mod chunker;
mod cleaner;
mod config;
#[allow(dead_code)]
mod db;
#[allow(dead_code)]
mod embedding;
mod events;
mod extraction;
#[allow(dead_code)]
mod graph_store;
mod ingest;
mod models;
mod rerank;
mod retrieval;
mod sources;
#[allow(dead_code)]
mod vector_store;
mod workers;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::embedding::HttpEmbedder;
use crate::events::EventMode;
use crate::graph_store::SqliteGraphStore;
use crate::rerank::HttpReranker;
use crate::retrieval::QueryEngine;
use crate::vector_store::{QdrantIndex, VectorIndex};

/// Recall Harness — a local-first document ingestion and retrieval-augmented
/// context assembly engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/recall.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rcl",
    about = "Recall Harness — ingest documents, index them for semantic search, and assemble cited context",
    version,
    long_about = "Recall Harness ingests heterogeneous documents (PDF, notes, audio transcripts), \
    splits them into overlapping retrieval chunks, indexes them in a vector store, extracts \
    entity/relation facts into a local knowledge graph, and assembles token-budgeted, \
    citation-annotated context for a downstream answer generator."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    /// Pipeline event output: `off`, `human`, or `json`. Defaults to
    /// `human` when stderr is a terminal.
    #[arg(long, global = true)]
    events: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the local stores.
    ///
    /// Creates the SQLite knowledge-graph schema and the vector-store
    /// collection. Idempotent — running it multiple times is safe.
    Init,

    /// Ingest source documents.
    ///
    /// Scans the configured sources root, cleans and chunks each document,
    /// embeds the chunks, writes them to the vector store, and (when an
    /// inference sidecar is configured) extracts knowledge facts into the
    /// graph store.
    Ingest {
        /// Dry run — report document and chunk counts without writing.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Assemble context for a question.
    ///
    /// Embeds the question, searches the vector store, optionally re-ranks,
    /// and prints the budget-bounded, citation-annotated context block.
    Query {
        /// The question to retrieve context for.
        question: String,

        /// Also fuse knowledge-graph facts matched by question keywords.
        #[arg(long)]
        hybrid: bool,

        /// Print the full outcome as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },

    /// Look up knowledge-graph relations by keyword.
    Facts {
        /// Keyword matched against relation subjects and objects.
        keyword: String,

        /// Maximum number of facts to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let event_mode = match cli.events.as_deref() {
        None => EventMode::default_for_tty(),
        Some("off") => EventMode::Off,
        Some("human") => EventMode::Human,
        Some("json") => EventMode::Json,
        Some(other) => anyhow::bail!("Unknown events mode: {}. Use off, human, or json.", other),
    };
    let reporter = event_mode.reporter();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            SqliteGraphStore::open(&cfg.graph.path).await?;
            let index = QdrantIndex::new(&cfg.vector, cfg.embedding.dims)?;
            index.ensure_collection().await?;
            println!("Stores initialized successfully.");
        }
        Commands::Ingest { dry_run, limit } => {
            ingest::run_ingest(&cfg, reporter.as_ref(), dry_run, limit).await?;
        }
        Commands::Query {
            question,
            hybrid,
            json,
        } => {
            let embedder = Arc::new(HttpEmbedder::new(&cfg.embedding)?);
            let index = Arc::new(QdrantIndex::new(&cfg.vector, cfg.embedding.dims)?);

            let mut engine = QueryEngine::new(embedder, index, cfg.retrieval.clone())
                .with_reporter(Arc::from(reporter));
            if let Some(rerank_cfg) = &cfg.rerank {
                engine = engine.with_reranker(Arc::new(HttpReranker::new(rerank_cfg)?));
            }
            if hybrid {
                engine =
                    engine.with_graph(Arc::new(SqliteGraphStore::open(&cfg.graph.path).await?));
            }

            let outcome = if hybrid {
                engine.query_hybrid(&question).await?
            } else {
                engine.query(&question).await?
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else if outcome.contexts.is_empty() {
                println!("No relevant context found.");
            } else {
                for (i, context) in outcome.contexts.iter().enumerate() {
                    println!(
                        "{}. [{:.2}] {} / page {}",
                        i + 1,
                        context.ranking_score(),
                        context.source_name,
                        context.page_number
                    );
                }
                println!();
                println!("{}", outcome.context_text);
            }
        }
        Commands::Facts { keyword, limit } => {
            let graph = SqliteGraphStore::open(&cfg.graph.path).await?;
            let facts = graph.query_relations(&keyword, limit).await?;
            if facts.is_empty() {
                println!("No facts.");
            } else {
                for fact in &facts {
                    println!(
                        "{} {} {}  ({}, page {})",
                        fact.subject, fact.relation, fact.object, fact.source_doc, fact.page_number
                    );
                }
            }
        }
    }

    Ok(())
}
