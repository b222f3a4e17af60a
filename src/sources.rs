//! Source document discovery and page loading.
//!
//! Walks the configured root for ingestible files and turns each one into a
//! sequence of [`PageText`]s. PDFs go through `pdf-extract`; notes and
//! transcripts are plain text read as a single page. Audio reaches the
//! pipeline as transcript text produced by the external transcriber — the
//! harness never decodes audio itself.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::SourcesConfig;
use crate::models::PageText;

/// What kind of source a discovered file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Note,
}

/// A discovered source document, not yet loaded.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// File name used as the citation source label.
    pub name: String,
    pub kind: SourceKind,
}

/// Scan the sources root for ingestible documents.
///
/// Results are sorted by path for deterministic ordering.
pub fn discover(config: &SourcesConfig) -> Result<Vec<SourceDocument>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Sources root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec!["**/.*".to_string(), "**/.*/**".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let Some(kind) = kind_for(path) else {
            continue;
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| rel_str.clone());

        documents.push(SourceDocument {
            path: path.to_path_buf(),
            name,
            kind,
        });
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(documents)
}

fn kind_for(path: &Path) -> Option<SourceKind> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => Some(SourceKind::Pdf),
        Some("md") | Some("txt") => Some(SourceKind::Note),
        _ => None,
    }
}

/// Load a document's raw pages.
pub fn load_pages(document: &SourceDocument) -> Result<Vec<PageText>> {
    match document.kind {
        SourceKind::Pdf => load_pdf_pages(&document.path),
        SourceKind::Note => load_note_page(&document.path),
    }
}

/// Extract PDF text and split it into pages on form feeds when the
/// extractor emits them; otherwise the whole document is one page.
fn load_pdf_pages(path: &Path) -> Result<Vec<PageText>> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| anyhow::anyhow!("PDF extraction failed for {}: {}", path.display(), e))?;

    let pages: Vec<PageText> = if text.contains('\u{c}') {
        text.split('\u{c}')
            .enumerate()
            .map(|(i, page)| PageText::new(i as u32 + 1, page.to_string()))
            .collect()
    } else {
        vec![PageText::new(1, text)]
    };

    Ok(pages)
}

fn load_note_page(path: &Path) -> Result<Vec<PageText>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(vec![PageText::new(1, text)])
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
