//! Pipeline event reporting.
//!
//! Every stage of ingestion and retrieval emits [`PipelineEvent`]s through a
//! [`Reporter`] handed to it by the caller — there is no ambient logger.
//! Events are emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single observable event from the ingestion or query pipeline.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// A source document entered the pipeline.
    DocumentStarted { source: String, pages: usize },
    /// A cleaned page held no text; it produced zero chunks.
    EmptyPage { source: String, page_number: u32 },
    /// A single paragraph exceeded the chunk bound and was force-sliced.
    ForcedSlice {
        source: String,
        page_number: u32,
        char_count: usize,
    },
    /// A document's chunks were embedded and written to the vector index.
    DocumentIndexed { source: String, chunks: usize },
    /// Fact extraction progress over a document's chunks.
    FactExtraction {
        source: String,
        n: usize,
        total: usize,
    },
    /// A document was skipped because its text could not be loaded.
    DocumentSkipped { source: String, reason: String },
    /// The re-ranking collaborator failed; ordering fell back to similarity.
    RerankFallback { reason: String },
    /// A query produced no candidates above the score threshold.
    NoContext { question: String },
}

/// Receives pipeline events. Implementations write to stderr (human or JSON).
pub trait Reporter: Send + Sync {
    fn report(&self, event: PipelineEvent);
}

/// Human-friendly event lines on stderr.
pub struct StderrReporter;

impl Reporter for StderrReporter {
    fn report(&self, event: PipelineEvent) {
        let line = match &event {
            PipelineEvent::DocumentStarted { source, pages } => {
                format!("ingest {}  {} pages\n", source, pages)
            }
            PipelineEvent::EmptyPage {
                source,
                page_number,
            } => format!("ingest {}  page {} is empty, skipped\n", source, page_number),
            PipelineEvent::ForcedSlice {
                source,
                page_number,
                char_count,
            } => format!(
                "ingest {}  page {}: paragraph of {} chars force-sliced\n",
                source, page_number, char_count
            ),
            PipelineEvent::DocumentIndexed { source, chunks } => {
                format!("ingest {}  indexed  {} chunks\n", source, chunks)
            }
            PipelineEvent::FactExtraction { source, n, total } => {
                format!("ingest {}  extracting facts  {} / {} chunks\n", source, n, total)
            }
            PipelineEvent::DocumentSkipped { source, reason } => {
                format!("ingest {}  skipped: {}\n", source, reason)
            }
            PipelineEvent::RerankFallback { reason } => {
                format!("query  rerank unavailable ({}), using similarity order\n", reason)
            }
            PipelineEvent::NoContext { question } => {
                format!("query  no relevant context for: {}\n", question)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable events: one JSON object per line on stderr.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn report(&self, event: PipelineEvent) {
        let obj = match &event {
            PipelineEvent::DocumentStarted { source, pages } => serde_json::json!({
                "event": "document_started", "source": source, "pages": pages
            }),
            PipelineEvent::EmptyPage {
                source,
                page_number,
            } => serde_json::json!({
                "event": "empty_page", "source": source, "page": page_number
            }),
            PipelineEvent::ForcedSlice {
                source,
                page_number,
                char_count,
            } => serde_json::json!({
                "event": "forced_slice", "source": source, "page": page_number,
                "chars": char_count
            }),
            PipelineEvent::DocumentIndexed { source, chunks } => serde_json::json!({
                "event": "document_indexed", "source": source, "chunks": chunks
            }),
            PipelineEvent::FactExtraction { source, n, total } => serde_json::json!({
                "event": "fact_extraction", "source": source, "n": n, "total": total
            }),
            PipelineEvent::DocumentSkipped { source, reason } => serde_json::json!({
                "event": "document_skipped", "source": source, "reason": reason
            }),
            PipelineEvent::RerankFallback { reason } => serde_json::json!({
                "event": "rerank_fallback", "reason": reason
            }),
            PipelineEvent::NoContext { question } => serde_json::json!({
                "event": "no_context", "question": question
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when event output is disabled.
pub struct NoReporter;

impl Reporter for NoReporter {
    fn report(&self, _event: PipelineEvent) {}
}

/// Event output mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventMode {
    Off,
    Human,
    Json,
}

impl EventMode {
    /// Default: human events when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            EventMode::Human
        } else {
            EventMode::Off
        }
    }

    /// Build a reporter for this mode. Caller passes it through the pipeline.
    pub fn reporter(&self) -> Box<dyn Reporter> {
        match self {
            EventMode::Off => Box::new(NoReporter),
            EventMode::Human => Box::new(StderrReporter),
            EventMode::Json => Box::new(JsonReporter),
        }
    }
}
