//! Retrieval and context-assembly engine.
//!
//! Turns a natural-language question into a bounded, ranked, deduplicated,
//! citation-annotated context block for a downstream answer generator.
//!
//! # Pipeline
//!
//! 1. Embed the question via the embedding collaborator.
//! 2. Similarity search against the vector index. When a re-ranker is
//!    configured the engine requests a wider candidate set (`top_k ×
//!    funnel_factor`): the initial search is a coarse filter and re-ranking
//!    is strictly more discriminative.
//! 3. Optional re-ranking. Failures degrade to similarity ordering — the
//!    re-ranker is a refinement, never a hard dependency.
//! 4. Stable dedup by chunk id, then cut to `top_k`.
//! 5. Budget-bounded context assembly: formatted, cited blocks are appended
//!    while a whitespace-unit estimate of the running total stays within the
//!    budget. The first block that would exceed it is omitted and iteration
//!    stops; no lower-ranked block is substituted in its place.
//!
//! The hybrid variant additionally fuses knowledge-graph facts looked up by
//! question keywords, deduplicated by full tuple identity and bounded
//! independently of the vector-block budget.
//!
//! The engine is stateless across calls: each query is an independent
//! invocation sharing only read-only collaborators, so concurrent queries
//! need no coordination.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::events::{NoReporter, PipelineEvent, Reporter};
use crate::graph_store::SqliteGraphStore;
use crate::models::{KnowledgeFact, RetrievalCandidate};
use crate::rerank::Reranker;
use crate::vector_store::VectorIndex;

/// Result of one query. `context_text` is already budget-bounded and
/// citation-annotated; callers must not re-truncate it.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub question: String,
    pub contexts: Vec<RetrievalCandidate>,
    pub context_text: String,
    pub graph_facts: Vec<KnowledgeFact>,
}

impl QueryOutcome {
    fn empty(question: &str) -> Self {
        Self {
            question: question.to_string(),
            contexts: Vec::new(),
            context_text: String::new(),
            graph_facts: Vec::new(),
        }
    }
}

pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    reranker: Option<Arc<dyn Reranker>>,
    graph: Option<Arc<SqliteGraphStore>>,
    params: RetrievalConfig,
    reporter: Arc<dyn Reporter>,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        params: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            reranker: None,
            graph: None,
            params,
            reporter: Arc::new(NoReporter),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_graph(mut self, graph: Arc<SqliteGraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run the full retrieval pipeline for one question.
    ///
    /// A blank question and a zero-candidate search both yield an empty
    /// outcome (`contexts = []`, `context_text = ""`), never an error — the
    /// caller can answer with a graceful fallback.
    pub async fn query(&self, question: &str) -> Result<QueryOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(QueryOutcome::empty(question));
        }

        let query_vector = self.embedder.embed_query(question).await?;

        // Funnel: over-fetch when a second-pass ranker will narrow the set.
        let candidate_k = if self.reranker.is_some() {
            self.params.top_k * self.params.funnel_factor
        } else {
            self.params.top_k
        };

        let candidates = self
            .index
            .search(&query_vector, candidate_k, self.params.score_threshold)
            .await?;

        if candidates.is_empty() {
            self.reporter.report(PipelineEvent::NoContext {
                question: question.to_string(),
            });
            return Ok(QueryOutcome::empty(question));
        }

        let ranked = self.rank(question, candidates).await;
        let mut contexts = dedupe(ranked);
        contexts.truncate(self.params.top_k);

        let context_text = self.assemble_context(&contexts);

        Ok(QueryOutcome {
            question: question.to_string(),
            contexts,
            context_text,
            graph_facts: Vec::new(),
        })
    }

    /// Like [`query`](Self::query), additionally fusing knowledge-graph
    /// facts looked up by question keywords. The fact section is bounded by
    /// `max_graph_facts`, independent of the vector-block budget.
    pub async fn query_hybrid(&self, question: &str) -> Result<QueryOutcome> {
        let mut outcome = self.query(question).await?;

        let Some(graph) = &self.graph else {
            return Ok(outcome);
        };

        let mut facts: Vec<KnowledgeFact> = Vec::new();
        let mut seen: HashSet<KnowledgeFact> = HashSet::new();

        for keyword in extract_keywords(question, self.params.min_keyword_len) {
            for fact in graph
                .query_relations(&keyword, self.params.facts_per_keyword)
                .await?
            {
                if seen.insert(fact.clone()) {
                    facts.push(fact);
                }
            }
        }
        facts.truncate(self.params.max_graph_facts);

        if !facts.is_empty() {
            outcome.context_text = append_fact_section(&outcome.context_text, &facts);
            outcome.graph_facts = facts;
        }

        Ok(outcome)
    }

    /// Order candidates for delivery: by re-ranker score when the
    /// collaborator is configured and answers, by raw similarity otherwise.
    async fn rank(
        &self,
        question: &str,
        mut candidates: Vec<RetrievalCandidate>,
    ) -> Vec<RetrievalCandidate> {
        if let Some(reranker) = &self.reranker {
            let documents: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
            match reranker.rerank(question, &documents).await {
                Ok(scores) => {
                    for (candidate, score) in candidates.iter_mut().zip(scores) {
                        candidate.rerank_score = Some(score);
                    }
                    sort_by_score_desc(&mut candidates, |c| c.ranking_score());
                    return candidates;
                }
                Err(e) => {
                    self.reporter.report(PipelineEvent::RerankFallback {
                        reason: e.to_string(),
                    });
                }
            }
        }

        sort_by_score_desc(&mut candidates, |c| c.similarity_score);
        candidates
    }

    /// Append cited blocks while the unit estimate stays within the budget.
    ///
    /// Returns an empty string when no block fits: "found but truncated to
    /// nothing" is surfaced the same way as "nothing found".
    fn assemble_context(&self, candidates: &[RetrievalCandidate]) -> String {
        if candidates.is_empty() {
            return String::new();
        }

        let intro = "Context retrieved from the indexed documents:";
        let mut blocks: Vec<String> = vec![intro.to_string()];
        let mut total = estimate_units(intro);

        for candidate in candidates {
            let text = candidate.text.trim();
            if text.is_empty() {
                continue;
            }

            let label = if candidate.rerank_score.is_some() {
                "Relevance"
            } else {
                "Similarity"
            };
            let block = format!(
                "### Source: {} | Page {} | {}: {:.2}\n{}",
                candidate.source_name,
                candidate.page_number,
                label,
                candidate.ranking_score(),
                text
            );

            let cost = estimate_units(&block);
            if total + cost > self.params.context_budget {
                break;
            }
            total += cost;
            blocks.push(block);
        }

        if blocks.len() == 1 {
            return String::new();
        }
        blocks.join("\n\n")
    }
}

/// Stable filter keeping the first occurrence of each chunk id, preserving
/// the current (ranked) order.
pub fn dedupe(candidates: Vec<RetrievalCandidate>) -> Vec<RetrievalCandidate> {
    let mut seen: HashSet<String> = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.chunk_id.clone()))
        .collect()
}

/// Coarse, stable length proxy for context budgeting: the number of
/// whitespace-delimited units. Cheap and monotonic in appended text, which
/// is all the budget check needs.
pub fn estimate_units(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keyword terms for graph lookups: whitespace tokens with surrounding
/// punctuation stripped, lowercased, at least `min_len` characters, first
/// occurrence wins.
pub fn extract_keywords(question: &str, min_len: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    question
        .split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|token| token.chars().count() >= min_len)
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

fn append_fact_section(context_text: &str, facts: &[KnowledgeFact]) -> String {
    let mut section = String::from("Related knowledge-graph facts:");
    for fact in facts {
        section.push_str(&format!(
            "\n- {} {} {} ({}, page {})",
            fact.subject, fact.relation, fact.object, fact.source_doc, fact.page_number
        ));
    }

    if context_text.is_empty() {
        section
    } else {
        format!("{}\n\n{}", context_text, section)
    }
}

fn sort_by_score_desc<F>(candidates: &mut [RetrievalCandidate], score: F)
where
    F: Fn(&RetrievalCandidate) -> f32,
{
    candidates.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, ExtractedGraph, Relation};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;

    // ============ Mock collaborators ============

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct PanickingEmbedder;

    #[async_trait]
    impl Embedder for PanickingEmbedder {
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            panic!("embedder must not be called for a blank question");
        }
    }

    /// Returns a fixed candidate list and records every requested top_k.
    struct StaticIndex {
        candidates: Vec<RetrievalCandidate>,
        requested: Mutex<Vec<usize>>,
    }

    impl StaticIndex {
        fn new(candidates: Vec<RetrievalCandidate>) -> Self {
            Self {
                candidates,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for StaticIndex {
        async fn ensure_collection(&self) -> Result<()> {
            Ok(())
        }
        async fn upsert(&self, _chunks: &[crate::models::EmbeddedChunk]) -> Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _vector: &[f32],
            top_k: usize,
            score_threshold: f32,
        ) -> Result<Vec<RetrievalCandidate>> {
            self.requested.lock().unwrap().push(top_k);
            let mut out: Vec<RetrievalCandidate> = self
                .candidates
                .iter()
                .filter(|c| c.similarity_score >= score_threshold)
                .cloned()
                .collect();
            out.truncate(top_k);
            Ok(out)
        }
    }

    /// Scores documents in reverse input order: last in, highest score.
    struct ReversingReranker;

    #[async_trait]
    impl Reranker for ReversingReranker {
        async fn rerank(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>> {
            Ok((0..documents.len()).map(|i| i as f32).collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(&self, _query: &str, _documents: &[String]) -> Result<Vec<f32>> {
            bail!("rerank sidecar timed out");
        }
    }

    fn candidate(id: &str, similarity: f32, text: &str) -> RetrievalCandidate {
        RetrievalCandidate {
            chunk_id: id.to_string(),
            page_number: 1,
            text: text.to_string(),
            source_name: "doc.pdf".to_string(),
            similarity_score: similarity,
            rerank_score: None,
        }
    }

    fn params() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    fn engine_with(index: StaticIndex, params: RetrievalConfig) -> QueryEngine {
        QueryEngine::new(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            Arc::new(index),
            params,
        )
    }

    // ============ Tests ============

    #[tokio::test]
    async fn test_blank_question_short_circuits() {
        let engine = QueryEngine::new(
            Arc::new(PanickingEmbedder),
            Arc::new(StaticIndex::new(vec![])),
            params(),
        );
        let outcome = engine.query("   ").await.unwrap();
        assert!(outcome.contexts.is_empty());
        assert_eq!(outcome.context_text, "");
    }

    #[tokio::test]
    async fn test_zero_candidates_is_empty_outcome_not_error() {
        let engine = engine_with(StaticIndex::new(vec![]), params());
        let outcome = engine.query("anything at all").await.unwrap();
        assert!(outcome.contexts.is_empty());
        assert_eq!(outcome.context_text, "");
    }

    #[tokio::test]
    async fn test_similarity_ordering_without_reranker() {
        let index = StaticIndex::new(vec![
            candidate("low", 0.4, "low text"),
            candidate("high", 0.9, "high text"),
            candidate("mid", 0.6, "mid text"),
        ]);
        let engine = engine_with(index, params());
        let outcome = engine.query("question").await.unwrap();

        let ids: Vec<&str> = outcome.contexts.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
        assert!(outcome.contexts.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_funnel_widens_search_only_with_reranker() {
        let mut p = params();
        p.top_k = 5;
        p.funnel_factor = 4;

        let plain_index = Arc::new(StaticIndex::new(vec![]));
        let plain = QueryEngine::new(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            plain_index.clone(),
            p.clone(),
        );
        let _ = plain.query("question").await.unwrap();
        assert_eq!(plain_index.requested.lock().unwrap().as_slice(), &[5]);

        let funneled_index = Arc::new(StaticIndex::new(vec![]));
        let funneled = QueryEngine::new(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            funneled_index.clone(),
            p,
        )
        .with_reranker(Arc::new(ReversingReranker));
        let _ = funneled.query("question").await.unwrap();
        assert_eq!(funneled_index.requested.lock().unwrap().as_slice(), &[20]);
    }

    #[tokio::test]
    async fn test_rerank_reorders_candidates() {
        let index = StaticIndex::new(vec![
            candidate("first", 0.9, "first text"),
            candidate("second", 0.8, "second text"),
            candidate("third", 0.7, "third text"),
        ]);
        let engine = engine_with(index, params()).with_reranker(Arc::new(ReversingReranker));
        let outcome = engine.query("question").await.unwrap();

        let ids: Vec<&str> = outcome.contexts.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["third", "second", "first"]);
        assert!(outcome.contexts.iter().all(|c| c.rerank_score.is_some()));
        assert!(outcome.context_text.contains("Relevance"));
    }

    #[tokio::test]
    async fn test_rerank_failure_falls_back_to_similarity_order() {
        let candidates = vec![
            candidate("b", 0.8, "b text"),
            candidate("a", 0.9, "a text"),
            candidate("c", 0.7, "c text"),
        ];
        let with_failing = engine_with(StaticIndex::new(candidates.clone()), params())
            .with_reranker(Arc::new(FailingReranker));
        let without = engine_with(StaticIndex::new(candidates), params());

        let degraded = with_failing.query("question").await.unwrap();
        let plain = without.query("question").await.unwrap();

        let degraded_ids: Vec<&str> =
            degraded.contexts.iter().map(|c| c.chunk_id.as_str()).collect();
        let plain_ids: Vec<&str> = plain.contexts.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(degraded_ids, plain_ids);
        assert!(degraded.contexts.iter().all(|c| c.rerank_score.is_none()));
        assert!(degraded.context_text.contains("Similarity"));
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence_in_order() {
        let deduped = dedupe(vec![
            candidate("a", 0.9, "a1"),
            candidate("b", 0.8, "b"),
            candidate("a", 0.7, "a2"),
            candidate("c", 0.6, "c"),
            candidate("b", 0.5, "b2"),
        ]);
        let ids: Vec<&str> = deduped.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(deduped[0].text, "a1");
    }

    #[tokio::test]
    async fn test_budget_stops_at_first_oversized_block() {
        // Block costs (header = 8 units + body): small bodies fit, the huge
        // middle block overflows, and the small last block must NOT be
        // substituted in its place.
        let huge_body = "word ".repeat(500);
        let index = StaticIndex::new(vec![
            candidate("fits", 0.9, "tiny body"),
            candidate("huge", 0.8, huge_body.trim()),
            candidate("later", 0.7, "another tiny body"),
        ]);
        let mut p = params();
        p.context_budget = 40;
        let engine = engine_with(index, p);

        let outcome = engine.query("question").await.unwrap();
        assert!(outcome.context_text.contains("tiny body"));
        assert!(!outcome.context_text.contains("word word"));
        assert!(!outcome.context_text.contains("another tiny body"));
        assert!(estimate_units(&outcome.context_text) <= 40);
        // All three candidates are still reported; only the text is bounded.
        assert_eq!(outcome.contexts.len(), 3);
    }

    #[tokio::test]
    async fn test_budget_too_small_for_any_block_yields_empty_text() {
        let index = StaticIndex::new(vec![candidate("a", 0.9, "some body text here")]);
        let mut p = params();
        p.context_budget = 5;
        let engine = engine_with(index, p);

        let outcome = engine.query("question").await.unwrap();
        assert_eq!(outcome.context_text, "");
        assert_eq!(outcome.contexts.len(), 1);
    }

    #[test]
    fn test_estimate_units_counts_whitespace_tokens() {
        assert_eq!(estimate_units(""), 0);
        assert_eq!(estimate_units("one two  three\nfour"), 4);
    }

    #[test]
    fn test_extract_keywords_filters_and_dedupes() {
        let keywords = extract_keywords("What does Turing say about Turing machines, then?", 4);
        assert_eq!(keywords, vec!["what", "does", "turing", "about", "machines", "then"]);
    }

    #[test]
    fn test_extract_keywords_strips_punctuation_before_length_check() {
        let keywords = extract_keywords("AI? ml. go!", 3);
        assert!(keywords.is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_appends_bounded_deduped_facts() {
        let graph = SqliteGraphStore::open_in_memory().await.unwrap();
        graph
            .add_knowledge(
                &ExtractedGraph {
                    entities: vec![Entity {
                        name: "Turing".into(),
                        kind: "Person".into(),
                    }],
                    relations: vec![
                        Relation {
                            subject: "Turing".into(),
                            relation: "proposed".into(),
                            object: "machines".into(),
                        },
                        Relation {
                            subject: "Turing".into(),
                            relation: "worked_at".into(),
                            object: "Bletchley".into(),
                        },
                    ],
                },
                "paper.pdf",
                2,
            )
            .await
            .unwrap();

        let index = StaticIndex::new(vec![candidate("a", 0.9, "body text")]);
        let engine =
            engine_with(index, params()).with_graph(Arc::new(graph));

        // Both keywords hit the same "Turing proposed machines" row; the
        // fact appears once.
        let outcome = engine.query_hybrid("Turing machines").await.unwrap();
        assert_eq!(outcome.graph_facts.len(), 2);
        assert_eq!(
            outcome
                .graph_facts
                .iter()
                .filter(|f| f.relation == "proposed")
                .count(),
            1
        );
        assert!(outcome.context_text.contains("Related knowledge-graph facts:"));
        assert!(outcome.context_text.contains("(paper.pdf, page 2)"));
    }

    #[tokio::test]
    async fn test_hybrid_without_graph_matches_plain_query() {
        let index = StaticIndex::new(vec![candidate("a", 0.9, "body text")]);
        let engine = engine_with(index, params());
        let outcome = engine.query_hybrid("some question").await.unwrap();
        assert!(outcome.graph_facts.is_empty());
        assert!(!outcome.context_text.contains("Related knowledge-graph facts:"));
    }

    #[tokio::test]
    async fn test_hybrid_facts_respect_max_bound() {
        let graph = SqliteGraphStore::open_in_memory().await.unwrap();
        for i in 0..20 {
            graph
                .add_knowledge(
                    &ExtractedGraph {
                        entities: vec![],
                        relations: vec![Relation {
                            subject: format!("subject{}", i),
                            relation: "mentions".into(),
                            object: "retrieval".into(),
                        }],
                    },
                    "notes.txt",
                    1,
                )
                .await
                .unwrap();
        }

        let index = StaticIndex::new(vec![candidate("a", 0.9, "body")]);
        let mut p = params();
        p.max_graph_facts = 3;
        p.facts_per_keyword = 20;
        let engine = engine_with(index, p).with_graph(Arc::new(graph));

        let outcome = engine.query_hybrid("retrieval").await.unwrap();
        assert_eq!(outcome.graph_facts.len(), 3);
    }

    #[tokio::test]
    async fn test_score_threshold_filters_candidates() {
        let index = StaticIndex::new(vec![
            candidate("strong", 0.8, "strong"),
            candidate("weak", 0.1, "weak"),
        ]);
        let engine = engine_with(index, params());
        let outcome = engine.query("question").await.unwrap();
        assert_eq!(outcome.contexts.len(), 1);
        assert_eq!(outcome.contexts[0].chunk_id, "strong");
    }
}
