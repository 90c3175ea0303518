//! Sentence-aware overlapping chunker.
//!
//! Splits cleaned text into paragraph-packed chunks of roughly `chunk_size`
//! characters. Consecutive chunks share an overlap prefix derived from the
//! end of the previous chunk, aligned to a sentence boundary when one is
//! found. Paragraphs larger than `chunk_size` pass through whole; the size
//! is a target, not a hard ceiling.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::{chunk_id, Chunk, ChunkMetadata};
use crate::text::tokens::estimate_tokens;

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

/// A paragraph located in the cleaned text (offsets in chars and bytes).
struct Paragraph {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    /// Split `text` into ordered chunks for `document_id`. User-supplied
    /// metadata keys are carried into every chunk unchanged.
    pub fn chunk(
        &self,
        text: &str,
        document_id: &str,
        document_title: &str,
        user_metadata: &HashMap<String, Value>,
    ) -> Vec<Chunk> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Vec::new();
        }

        let paragraphs = split_paragraphs(&cleaned);
        let mut bodies: Vec<(String, usize, usize)> = Vec::new(); // (text, start_char, end_char)

        let mut cur = String::new();
        let mut cur_len = 0usize; // chars
        let mut cur_start = 0usize;
        let mut cur_end = 0usize;
        let mut has_fresh = false;

        for para in &paragraphs {
            let p_text = &cleaned[para.byte_start..para.byte_end];
            let p_len = para.char_end - para.char_start;

            if has_fresh && cur_len + 2 + p_len > self.chunk_size {
                // Emit the current chunk and seed the next with an overlap
                // suffix of it.
                bodies.push((std::mem::take(&mut cur), cur_start, cur_end));
                let seed = self.derive_overlap(&bodies.last().unwrap().0);
                cur_len = seed.chars().count();
                cur = seed;
                has_fresh = false;
                cur_start = para.char_start;
            }

            if !has_fresh && cur.is_empty() {
                cur_start = para.char_start;
            } else {
                cur.push_str("\n\n");
                cur_len += 2;
            }
            cur.push_str(p_text);
            cur_len += p_len;
            cur_end = para.char_end;
            has_fresh = true;
        }

        if has_fresh {
            bodies.push((cur, cur_start, cur_end));
        }

        // Whole-text fallback when paragraph detection produced nothing.
        if bodies.is_empty() {
            let total = cleaned.chars().count();
            bodies.push((cleaned.clone(), 0, total));
        }

        bodies
            .into_iter()
            .enumerate()
            .map(|(index, (body, start_char, end_char))| Chunk {
                chunk_id: chunk_id(document_id, index),
                metadata: ChunkMetadata {
                    document_id: document_id.to_string(),
                    document_title: document_title.to_string(),
                    chunk_index: index,
                    start_char: Some(start_char),
                    end_char: Some(end_char),
                    tokens: Some(estimate_tokens(&body)),
                    media_type: None,
                    media_url: None,
                    category: None,
                    extra: user_metadata.clone(),
                },
                text: body,
            })
            .collect()
    }

    /// Derive the overlap prefix for the next chunk from the tail of the
    /// just-emitted one. Looks for a sentence boundary inside the last
    /// `2·chunk_overlap` characters; falls back to the last `chunk_overlap`
    /// characters verbatim.
    fn derive_overlap(&self, chunk: &str) -> String {
        if self.chunk_overlap == 0 {
            return String::new();
        }

        let chars: Vec<char> = chunk.chars().collect();
        let window_len = (2 * self.chunk_overlap).min(chars.len());
        let window = &chars[chars.len() - window_len..];

        if let Some(start) = sentence_boundary(window) {
            return window[start..].iter().collect();
        }

        let tail = self.chunk_overlap.min(chars.len());
        chars[chars.len() - tail..].iter().collect()
    }
}

/// Find the first sentence boundary in `window`: `.`, `?` or `!` followed by
/// whitespace followed by an uppercase or CJK character. Returns the index
/// of the character the next sentence starts at.
fn sentence_boundary(window: &[char]) -> Option<usize> {
    let mut i = 0;
    while i + 2 < window.len() {
        if matches!(window[i], '.' | '?' | '!') && window[i + 1].is_whitespace() {
            let mut j = i + 1;
            while j < window.len() && window[j].is_whitespace() {
                j += 1;
            }
            if j < window.len() && (window[j].is_uppercase() || is_cjk_char(window[j])) {
                return Some(j);
            }
        }
        i += 1;
    }
    None
}

fn is_cjk_char(c: char) -> bool {
    matches!(
        c as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF
    )
}

/// Normalize newlines, trim every line, and cap runs of blank lines at three.
fn clean_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<&str> = Vec::new();
    let mut blanks = 0usize;
    for line in normalized.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            blanks += 1;
            if blanks <= 3 {
                lines.push("");
            }
        } else {
            blanks = 0;
            lines.push(line);
        }
    }

    // Trim leading/trailing blank lines
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

/// Split cleaned text into paragraphs at runs of two or more newlines.
/// Single newlines stay inside their paragraph.
fn split_paragraphs(cleaned: &str) -> Vec<Paragraph> {
    let chars: Vec<(usize, char)> = cleaned.char_indices().collect();
    let mut paragraphs = Vec::new();
    let mut seg_start: Option<usize> = None;

    let mut i = 0;
    while i < chars.len() {
        if chars[i].1 == '\n' {
            let mut j = i;
            while j < chars.len() && chars[j].1 == '\n' {
                j += 1;
            }
            if j - i >= 2 {
                if let Some(s) = seg_start.take() {
                    paragraphs.push(make_paragraph(&chars, cleaned.len(), s, i));
                }
            }
            i = j;
        } else {
            if seg_start.is_none() {
                seg_start = Some(i);
            }
            i += 1;
        }
    }
    if let Some(s) = seg_start {
        paragraphs.push(make_paragraph(&chars, cleaned.len(), s, chars.len()));
    }

    paragraphs
}

fn make_paragraph(
    chars: &[(usize, char)],
    total_bytes: usize,
    char_start: usize,
    char_end: usize,
) -> Paragraph {
    Paragraph {
        byte_start: chars[char_start].0,
        byte_end: if char_end < chars.len() {
            chars[char_end].0
        } else {
            total_bytes
        },
        char_start,
        char_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(500, 50)
    }

    fn no_meta() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunks = chunker().chunk("", "doc_a", "T", &no_meta());
        assert!(chunks.is_empty());
        let chunks = chunker().chunk("  \n\n  \n", "doc_a", "T", &no_meta());
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunker().chunk("Alpha beta.\n\nGamma delta.", "doc_a", "T", &no_meta());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "doc_a_chunk_0");
        assert_eq!(chunks[0].text, "Alpha beta.\n\nGamma delta.");
        assert_eq!(chunks[0].metadata.chunk_index, 0);
        assert_eq!(chunks[0].metadata.start_char, Some(0));
        assert!(chunks[0].metadata.tokens.unwrap() > 0);
    }

    #[test]
    fn test_chunk_ids_are_dense_and_ordered() {
        let paragraph = "x".repeat(300);
        let text = vec![paragraph; 6].join("\n\n");
        let chunks = chunker().chunk(&text, "doc_a", "T", &no_meta());
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id, format!("doc_a_chunk_{i}"));
            assert_eq!(chunk.metadata.chunk_index, i);
        }
    }

    #[test]
    fn test_forty_paragraphs_of_twenty_chars() {
        // 40 paragraphs × 20 chars ≈ 880 chars of content
        let para = "abcdefghij klmnopqrs";
        let text = vec![para; 40].join("\n\n");
        let chunks = chunker().chunk(&text, "doc_a", "T", &no_meta());
        assert!(
            (2..=4).contains(&chunks.len()),
            "expected 2-4 chunks, got {}",
            chunks.len()
        );
        // Adjacent chunks share a suffix/prefix of at most 2×overlap chars
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            let max_overlap = 100.min(prev.len()).min(next.len());
            let shared = (1..=max_overlap)
                .rev()
                .find(|&n| prev[prev.len() - n..] == next[..n]);
            assert!(shared.is_some(), "consecutive chunks share no overlap");
            assert!(shared.unwrap() <= 100);
        }
    }

    #[test]
    fn test_every_paragraph_is_covered() {
        let paragraphs: Vec<String> = (0..15)
            .map(|i| format!("Paragraph number {i} with some filler text to give it body."))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunker().chunk(&text, "doc_a", "T", &no_meta());
        let all: String = chunks.iter().map(|c| c.text.as_str()).collect();
        for p in &paragraphs {
            assert!(all.contains(p), "paragraph lost: {p}");
        }
    }

    #[test]
    fn test_oversize_paragraph_passes_through() {
        let big = "y".repeat(2_000);
        let chunks = chunker().chunk(&big, "doc_a", "T", &no_meta());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, big);
    }

    #[test]
    fn test_overlap_prefers_sentence_boundary() {
        let c = Chunker::new(500, 50);
        // The window holds a clear boundary: ". Next"
        let chunk = format!("{} tail of it. Next sentence starts here", "a".repeat(400));
        let overlap = c.derive_overlap(&chunk);
        assert_eq!(overlap, "Next sentence starts here");
    }

    #[test]
    fn test_overlap_fallback_without_boundary() {
        let c = Chunker::new(500, 50);
        let chunk = "z".repeat(400);
        let overlap = c.derive_overlap(&chunk);
        assert_eq!(overlap.chars().count(), 50);
    }

    #[test]
    fn test_overlap_never_exceeds_window() {
        let c = Chunker::new(500, 50);
        let chunk = format!("{}. Word word word word", "b".repeat(300));
        let overlap = c.derive_overlap(&chunk);
        assert!(overlap.chars().count() <= 100);
    }

    #[test]
    fn test_overlap_bounded_by_source() {
        let c = Chunker::new(500, 50);
        let overlap = c.derive_overlap("tiny");
        assert!(overlap.chars().count() <= 4);
    }

    #[test]
    fn test_clean_normalizes_newlines_and_trims() {
        let cleaned = clean_text("  a line  \r\nsecond\r\n\r\nthird  ");
        assert_eq!(cleaned, "a line\nsecond\n\nthird");
    }

    #[test]
    fn test_clean_caps_blank_runs_at_three() {
        let cleaned = clean_text("a\n\n\n\n\n\n\n\nb");
        assert_eq!(cleaned, "a\n\n\n\nb"); // three blank lines between a and b
    }

    #[test]
    fn test_user_metadata_carried_into_chunks() {
        let mut meta = HashMap::new();
        meta.insert("source".to_string(), Value::String("upload".to_string()));
        let chunks = chunker().chunk("Some text here.", "doc_a", "T", &meta);
        assert_eq!(
            chunks[0].metadata.extra.get("source"),
            Some(&Value::String("upload".to_string()))
        );
    }

    #[test]
    fn test_cjk_text_chunks() {
        let para = "这是一个测试段落。".repeat(10);
        let text = vec![para.as_str(); 8].join("\n\n");
        let chunks = chunker().chunk(&text, "doc_a", "T", &no_meta());
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.metadata.tokens.unwrap() > 0);
        }
    }
}
