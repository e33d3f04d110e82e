//! Paragraph-boundary text chunker with overlap.
//!
//! Splits a [`Document`]'s text into [`Chunk`]s of at most
//! `max_tokens * CHARS_PER_TOKEN` characters. Paragraphs (`\n\n`) are packed
//! greedily; a paragraph longer than the limit is hard-split on whitespace.
//! Consecutive chunks share roughly `overlap_tokens` worth of trailing text so
//! a sentence cut at a boundary is still retrievable from either side.
//!
//! Chunk IDs are derived from the document ID and chunk index, so rebuilding
//! an unchanged corpus produces the same IDs.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split a document into chunks. Whitespace-only text yields no chunks.
pub fn chunk_document(doc: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    chunk_text(&doc.text, config.max_tokens, config.overlap_tokens)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(doc, i as i64, text))
        .collect()
}

/// Split text into chunk strings, in order.
pub fn chunk_text(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    let mut pieces = Vec::new();
    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if char_len(trimmed) > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            pieces.push(trimmed.to_string());
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();

    for piece in pieces {
        let joined_len = if buf.is_empty() {
            char_len(&piece)
        } else {
            char_len(&buf) + 2 + char_len(&piece)
        };

        if joined_len > max_chars && !buf.is_empty() {
            let tail = overlap_tail(&buf, overlap_chars);
            chunks.push(std::mem::take(&mut buf));
            if char_len(&tail) + 2 + char_len(&piece) <= max_chars {
                buf = tail;
            }
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(&piece);
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th char, or `s.len()`.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Split an oversized paragraph into pieces of at most `max_chars` chars,
/// preferring to cut at the last whitespace before the limit.
fn hard_split(text: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = text;
    while !remaining.is_empty() {
        if char_len(remaining) <= max_chars {
            out.push(remaining.trim().to_string());
            break;
        }
        let limit = byte_offset(remaining, max_chars);
        let cut = remaining[..limit]
            .rfind(char::is_whitespace)
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }
}

/// The last `overlap_chars` chars of `text`, starting at a word boundary.
fn overlap_tail(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }
    let total = char_len(text);
    if total <= overlap_chars {
        return String::new();
    }
    let start = byte_offset(text, total - overlap_chars);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim().to_string(),
        None => String::new(),
    }
}

fn make_chunk(doc: &Document, index: i64, text: String) -> Chunk {
    let hash = format!("{:x}", Sha256::digest(text.as_bytes()));

    let mut id_hasher = Sha256::new();
    id_hasher.update(doc.id.as_bytes());
    id_hasher.update(index.to_le_bytes());
    let id = format!("{:x}", id_hasher.finalize())[..32].to_string();

    Chunk {
        id,
        document_id: doc.id.clone(),
        chunk_index: index,
        text,
        hash,
        metadata: doc.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(text: &str) -> Document {
        let mut metadata = BTreeMap::new();
        metadata.insert("file_name".to_string(), "a.pdf".to_string());
        Document {
            id: "doc1".to_string(),
            text: text.to_string(),
            metadata,
        }
    }

    fn cfg(max_tokens: usize, overlap_tokens: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_tokens,
            overlap_tokens,
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_document(&doc("Hello, world!"), &cfg(700, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].metadata.get("file_name").unwrap(), "a.pdf");
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_document(&doc("  \n\n  "), &cfg(700, 0)).is_empty());
    }

    #[test]
    fn paragraphs_under_limit_are_packed() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn chunks_respect_max_chars() {
        let text = (0..60)
            .map(|i| format!("Sentence number {} about attention and memory.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 30, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 30 * CHARS_PER_TOKEN, "too long: {}", c);
        }
    }

    #[test]
    fn indices_are_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document(&doc(&text), &cfg(10, 2));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn overlap_repeats_tail_of_previous_chunk() {
        let text = "alpha beta gamma delta epsilon\n\nzeta eta theta iota kappa";
        // max 40 chars, overlap 8 chars
        let chunks = chunk_text(text, 10, 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("epsilon"), "got {:?}", chunks[1]);
        assert!(chunks[1].ends_with("kappa"));
    }

    #[test]
    fn oversized_paragraph_is_hard_split_on_whitespace() {
        let word = "réponse ";
        let text = word.repeat(40);
        let chunks = chunk_text(&text, 5, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 20);
            assert!(!c.starts_with(' '));
        }
    }

    #[test]
    fn deterministic_ids() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_document(&doc(text), &cfg(2, 0));
        let c2 = chunk_document(&doc(text), &cfg(2, 0));
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.hash, b.hash);
        }
        assert_ne!(c1[0].id, c1[1].id);
    }
}
