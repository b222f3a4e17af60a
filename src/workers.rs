//! Bounded worker pool for per-chunk fact extraction.
//!
//! Chunks are independent: extraction reads chunk text and writes
//! additively to the graph store, whose insert-if-absent semantics make
//! unordered concurrent completion safe. The pool caps in-flight work with
//! a semaphore; the inference collaborator additionally serializes its own
//! calls, so workers mostly overlap on parsing and store I/O.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::events::{PipelineEvent, Reporter};
use crate::extraction::FactExtractor;
use crate::graph_store::SqliteGraphStore;
use crate::models::TextChunk;

/// Outcome counters for one document's extraction pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct FactStats {
    pub entities: usize,
    pub relations: usize,
    pub failed_chunks: usize,
}

/// Run fact extraction over a document's chunks with at most `workers`
/// chunks in flight, persisting every extracted graph.
pub async fn extract_facts(
    chunks: &[TextChunk],
    extractor: Arc<FactExtractor>,
    graph: Arc<SqliteGraphStore>,
    workers: usize,
    reporter: &dyn Reporter,
) -> Result<FactStats> {
    if chunks.is_empty() {
        return Ok(FactStats::default());
    }

    let source = chunks[0].source_name.clone();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set: JoinSet<Result<(usize, usize)>> = JoinSet::new();

    for chunk in chunks.iter().cloned() {
        let permit = semaphore.clone().acquire_owned().await?;
        let extractor = extractor.clone();
        let graph = graph.clone();

        set.spawn(async move {
            let _permit = permit;
            let extracted = extractor.extract(&chunk.text).await;
            let counts = (extracted.entities.len(), extracted.relations.len());
            graph
                .add_knowledge(&extracted, &chunk.source_name, chunk.page_number)
                .await?;
            Ok(counts)
        });
    }

    let total = chunks.len();
    let mut stats = FactStats::default();
    let mut done = 0usize;

    while let Some(joined) = set.join_next().await {
        done += 1;
        match joined {
            Ok(Ok((entities, relations))) => {
                stats.entities += entities;
                stats.relations += relations;
            }
            _ => stats.failed_chunks += 1,
        }
        reporter.report(PipelineEvent::FactExtraction {
            source: source.clone(),
            n: done,
            total,
        });
    }

    Ok(stats)
}
