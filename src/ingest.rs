//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow per document: load pages → clean → chunk →
//! embed in batches → upsert into the vector index → extract facts into the
//! graph store. Dry-run mode reports counts without touching collaborators.
//!
//! Documents are independent: [`ingest_document`] shares no mutable state
//! between calls beyond the append-only stores, so callers may run several
//! documents in parallel with no ordering guarantee. Within one document,
//! segmentation is strictly sequential — overlap carries state across
//! consecutive chunk boundaries.

use std::sync::Arc;

use anyhow::Result;

use crate::chunker::Chunker;
use crate::cleaner;
use crate::config::Config;
use crate::embedding::{Embedder, HttpEmbedder};
use crate::events::{PipelineEvent, Reporter};
use crate::extraction::{FactExtractor, HttpInferenceClient};
use crate::graph_store::SqliteGraphStore;
use crate::models::{EmbeddedChunk, PageText};
use crate::sources;
use crate::vector_store::{QdrantIndex, VectorIndex};
use crate::workers;

/// Counters for one document.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentStats {
    pub pages: usize,
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
}

/// Counters for a whole ingest run.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub documents: usize,
    pub skipped_documents: usize,
    pub pages: usize,
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
}

/// Optional fact-extraction collaborators for a document.
pub struct FactSink {
    pub extractor: Arc<FactExtractor>,
    pub graph: Arc<SqliteGraphStore>,
    pub workers: usize,
}

/// Run one document through clean → chunk → embed → index → extract.
///
/// Store failures propagate; retry policy, if any, belongs to the
/// collaborator's own client.
pub async fn ingest_document(
    source_name: &str,
    pages: &[PageText],
    chunker: &Chunker,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    facts: Option<&FactSink>,
    batch_size: usize,
    reporter: &dyn Reporter,
) -> Result<DocumentStats> {
    reporter.report(PipelineEvent::DocumentStarted {
        source: source_name.to_string(),
        pages: pages.len(),
    });

    let cleaned = cleaner::clean_pages(pages);
    let chunks = chunker.chunk_pages(source_name, &cleaned, reporter);

    let mut stats = DocumentStats {
        pages: pages.len(),
        ..Default::default()
    };
    if chunks.is_empty() {
        return Ok(stats);
    }

    let mut embedded: Vec<EmbeddedChunk> = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        for (chunk, vector) in batch.iter().zip(vectors) {
            embedded.push(EmbeddedChunk {
                chunk: chunk.clone(),
                vector,
            });
        }
    }

    index.upsert(&embedded).await?;
    stats.chunks = embedded.len();
    reporter.report(PipelineEvent::DocumentIndexed {
        source: source_name.to_string(),
        chunks: embedded.len(),
    });

    if let Some(sink) = facts {
        let fact_stats = workers::extract_facts(
            &chunks,
            sink.extractor.clone(),
            sink.graph.clone(),
            sink.workers,
            reporter,
        )
        .await?;
        stats.entities = fact_stats.entities;
        stats.relations = fact_stats.relations;
    }

    Ok(stats)
}

/// Scan the sources root and ingest every discovered document.
pub async fn run_ingest(
    config: &Config,
    reporter: &dyn Reporter,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<IngestStats> {
    let mut documents = sources::discover(&config.sources)?;
    if let Some(lim) = limit {
        documents.truncate(lim);
    }

    let chunker = Chunker::new(
        config.chunking.max_chars,
        config.chunking.overlap_chars,
        config.chunking.min_chars,
    )?;

    if dry_run {
        let mut stats = IngestStats::default();
        for document in &documents {
            let Ok(pages) = sources::load_pages(document) else {
                stats.skipped_documents += 1;
                continue;
            };
            let cleaned = cleaner::clean_pages(&pages);
            let chunks = chunker.chunk_pages(&document.name, &cleaned, reporter);
            stats.documents += 1;
            stats.pages += pages.len();
            stats.chunks += chunks.len();
        }
        println!("ingest {} (dry-run)", config.sources.root.display());
        println!("  documents found: {}", documents.len());
        println!("  estimated chunks: {}", stats.chunks);
        return Ok(stats);
    }

    let embedder = HttpEmbedder::new(&config.embedding)?;
    let index = QdrantIndex::new(&config.vector, config.embedding.dims)?;
    index.ensure_collection().await?;

    let facts = match &config.inference {
        Some(inference) => Some(FactSink {
            extractor: Arc::new(FactExtractor::new(Arc::new(HttpInferenceClient::new(
                inference,
            )?))),
            graph: Arc::new(SqliteGraphStore::open(&config.graph.path).await?),
            workers: inference.workers,
        }),
        None => None,
    };

    let mut stats = IngestStats::default();

    for document in &documents {
        let pages = match sources::load_pages(document) {
            Ok(pages) => pages,
            Err(e) => {
                reporter.report(PipelineEvent::DocumentSkipped {
                    source: document.name.clone(),
                    reason: e.to_string(),
                });
                stats.skipped_documents += 1;
                continue;
            }
        };

        let doc_stats = ingest_document(
            &document.name,
            &pages,
            &chunker,
            &embedder,
            &index,
            facts.as_ref(),
            config.embedding.batch_size,
            reporter,
        )
        .await?;

        stats.documents += 1;
        stats.pages += doc_stats.pages;
        stats.chunks += doc_stats.chunks;
        stats.entities += doc_stats.entities;
        stats.relations += doc_stats.relations;
    }

    println!("ingest {}", config.sources.root.display());
    println!("  documents: {}", stats.documents);
    if stats.skipped_documents > 0 {
        println!("  skipped: {}", stats.skipped_documents);
    }
    println!("  pages: {}", stats.pages);
    println!("  chunks indexed: {}", stats.chunks);
    if config.inference.is_some() {
        println!("  entities: {}", stats.entities);
        println!("  relations: {}", stats.relations);
    }
    println!("ok");

    Ok(stats)
}
