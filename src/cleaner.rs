//! Page text normalization.
//!
//! Removes the technical noise common in extracted document text (whitespace
//! runs, line-break hyphenation, hard-wrapped lines) without touching
//! meaning or paragraph structure. This module never summarizes, rewrites,
//! or chunks — segmentation consumes its output.

use crate::models::{CleanedPageText, PageText};

/// Normalize a batch of raw pages. Pure and order-preserving.
pub fn clean_pages(pages: &[PageText]) -> Vec<CleanedPageText> {
    pages
        .iter()
        .map(|page| {
            let text = clean_text(&page.text);
            let cleaned_char_count = text.chars().count();
            CleanedPageText {
                page_number: page.page_number,
                text,
                original_char_count: page.char_count,
                cleaned_char_count,
            }
        })
        .collect()
}

/// Normalization pipeline for a single page. Order matters.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = normalize_whitespace(text);
    let text = remove_hyphenation(&text);
    let text = fix_line_breaks(&text);

    text.trim().to_string()
}

/// Collapse runs of spaces/tabs to a single space and cap newline runs at
/// two (one blank line), preserving paragraph boundaries.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;

    for ch in text.chars() {
        match ch {
            '\n' => {
                newline_run += 1;
                if newline_run <= 2 {
                    out.push('\n');
                }
            }
            ' ' | '\t' => {
                newline_run = 0;
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            '\r' => {}
            _ => {
                newline_run = 0;
                out.push(ch);
            }
        }
    }

    out
}

/// Rejoin words hyphenated across a line break: `infor-\nmation` → `information`.
fn remove_hyphenation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '-'
            && chars.get(i + 1) == Some(&'\n')
            && chars.get(i + 2).is_some_and(|c| c.is_alphanumeric())
        {
            // drop the hyphen and the break, keep the continuation
            i += 2;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

/// Join hard-wrapped lines into one line per paragraph, keeping blank lines
/// as paragraph separators.
fn fix_line_breaks(text: &str) -> String {
    let mut fixed: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            if !buffer.is_empty() {
                fixed.push(std::mem::take(&mut buffer));
            }
            fixed.push(String::new());
        } else {
            if !buffer.is_empty() {
                buffer.push(' ');
            }
            buffer.push_str(line);
        }
    }
    if !buffer.is_empty() {
        fixed.push(buffer);
    }

    fixed.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_space_runs() {
        assert_eq!(clean_text("a   b\t\tc"), "a b c");
    }

    #[test]
    fn test_caps_blank_lines() {
        let cleaned = clean_text("first\n\n\n\n\nsecond");
        assert_eq!(cleaned, "first\n\nsecond");
    }

    #[test]
    fn test_rejoins_hyphenated_words() {
        assert_eq!(clean_text("infor-\nmation loss"), "information loss");
    }

    #[test]
    fn test_hyphen_before_non_letter_is_kept() {
        // A hyphen at end of line followed by punctuation is not hyphenation.
        let cleaned = clean_text("range 1-\n- item");
        assert!(cleaned.contains('-'));
    }

    #[test]
    fn test_joins_wrapped_lines_within_paragraph() {
        let cleaned = clean_text("one line\nwrapped here\n\nnext paragraph");
        assert_eq!(cleaned, "one line wrapped here\n\nnext paragraph");
    }

    #[test]
    fn test_empty_page_stays_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("  \n \n  "), "");
    }

    #[test]
    fn test_clean_pages_tracks_counts() {
        let pages = vec![PageText::new(3, "a   b".to_string())];
        let cleaned = clean_pages(&pages);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].page_number, 3);
        assert_eq!(cleaned[0].original_char_count, 5);
        assert_eq!(cleaned[0].cleaned_char_count, 3);
        assert_eq!(cleaned[0].text, "a b");
    }
}
