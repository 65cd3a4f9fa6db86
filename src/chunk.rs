//! Paragraph-boundary text chunker.
//!
//! Splits parsed text into [`Chunk`]s bounded by `max_tokens`. Paragraphs
//! (`\n\n`-separated) are packed greedily; a paragraph longer than the bound
//! is hard-split at the last newline or space before the limit.
//!
//! Every input yields at least one chunk, even when empty. A data point
//! without stored chunks would have no stored fingerprint and would be
//! re-embedded on every run.

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
/// Indices are contiguous from 0.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut out = ChunkSink::default();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if joined_len > max_chars && !buf.is_empty() {
            out.push(&buf);
            buf.clear();
        }

        if para.len() > max_chars {
            hard_split(para, max_chars, &mut out);
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        out.push(&buf);
    }
    if out.chunks.is_empty() {
        out.push(text.trim());
    }
    out.chunks
}

/// Split markdown into sections at ATX headings, keeping each heading with
/// the body that follows it. Text before the first heading is its own section.
pub fn split_markdown_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && is_heading(line) && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

#[derive(Default)]
struct ChunkSink {
    chunks: Vec<Chunk>,
}

impl ChunkSink {
    fn push(&mut self, text: &str) {
        self.chunks.push(Chunk {
            chunk_index: self.chunks.len() as i64,
            text: text.to_string(),
        });
    }
}

fn hard_split(para: &str, max_chars: usize, out: &mut ChunkSink) {
    let mut remaining = para;
    while !remaining.is_empty() {
        let limit = floor_char_boundary(remaining, max_chars);
        let mut cut = if limit < remaining.len() {
            remaining[..limit]
                .rfind(['\n', ' '])
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        if cut == 0 {
            // A single char wider than the limit; take it whole.
            cut = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = &remaining[cut..];
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text_still_yields_one_chunk() {
        let chunks = chunk_text("", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn test_paragraphs_packed_under_limit() {
        let chunks = chunk_text("First.\n\nSecond.\n\nThird.", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "First.\n\nSecond.\n\nThird.");
    }

    #[test]
    fn test_indices_contiguous_when_split() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 10);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert!(c.text.len() <= 40);
        }
    }

    #[test]
    fn test_long_paragraph_hard_split_on_spaces() {
        let text = "word ".repeat(40);
        let chunks = chunk_text(&text, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 20);
            assert!(!c.text.starts_with(' '));
        }
    }

    #[test]
    fn test_multibyte_chars_do_not_panic() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text(text, 1);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        assert_eq!(chunk_text(text, 2), chunk_text(text, 2));
    }

    #[test]
    fn test_markdown_sections_split_on_headings() {
        let md = "intro line\n# One\nbody one\n## Two\nbody two\n";
        let sections = split_markdown_sections(md);
        assert_eq!(sections.len(), 3);
        assert!(sections[1].starts_with("# One"));
        assert!(sections[2].contains("body two"));
    }

    #[test]
    fn test_markdown_heading_inside_fence_ignored() {
        let md = "# Title\n```\n# not a heading\n```\ntext\n";
        assert_eq!(split_markdown_sections(md).len(), 1);
    }
}
