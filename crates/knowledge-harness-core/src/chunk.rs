//! Paragraph-boundary document chunker.
//!
//! Splits a [`RetrievalDocument`] into similarity-sized pieces that respect
//! a `chunk_size` limit (in chars). Splitting occurs on paragraph boundaries
//! (`\n\n`) to keep each chunk coherent; consecutive chunks share up to
//! `overlap` trailing chars of the previous chunk.
//!
//! Chunk ids are deterministic: `<document id>#<index>`. A document that
//! fits in one chunk is returned as-is, keeping its original id.
//!
//! # Algorithm
//!
//! 1. Split the content on `\n\n` paragraph boundaries.
//! 2. Accumulate paragraphs into a buffer until adding the next one would
//!    exceed `chunk_size`.
//! 3. When exceeded, flush the buffer and seed the next buffer with the
//!    overlap tail of the flushed chunk.
//! 4. A single paragraph longer than `chunk_size` is hard-split at the
//!    nearest newline or space.
//!
//! # Example
//!
//! ```rust
//! use knowledge_harness_core::chunk::chunk_document;
//! use knowledge_harness_core::models::RetrievalDocument;
//!
//! let doc = RetrievalDocument::new("markdown:a.md", "Hello world.\n\nSecond paragraph.");
//! let chunks = chunk_document(&doc, 1000, 100);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "markdown:a.md");
//! ```

use crate::models::{MetadataValue, RetrievalDocument};

/// Split a document into chunks of at most `chunk_size` chars plus overlap.
///
/// # Guarantees
///
/// - At least one chunk is always returned.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Every chunk inherits the parent's metadata plus `parent_id` and
///   `chunk_index`.
pub fn chunk_document(
    doc: &RetrievalDocument,
    chunk_size: usize,
    overlap: usize,
) -> Vec<RetrievalDocument> {
    let pieces = chunk_text(&doc.content, chunk_size, overlap);
    if pieces.len() <= 1 {
        return vec![doc.clone()];
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let mut chunk = RetrievalDocument {
                id: format!("{}#{}", doc.id, i),
                content: text,
                metadata: doc.metadata.clone(),
            };
            chunk
                .metadata
                .insert("parent_id".to_string(), MetadataValue::Text(doc.id.clone()));
            chunk
                .metadata
                .insert("chunk_index".to_string(), MetadataValue::Integer(i as i64));
            chunk
        })
        .collect()
}

/// Split text on paragraph boundaries, respecting `chunk_size` (chars).
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let max_chars = chunk_size.max(1);
    let overlap = overlap.min(max_chars / 2);

    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current_buf = String::new();
    // Length of the overlap seed at the start of `current_buf`.
    let mut seed_len = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let para_len = trimmed.chars().count();
        let buf_len = current_buf.chars().count();
        let would_be = if current_buf.is_empty() {
            para_len
        } else {
            buf_len + 2 + para_len
        };

        if would_be > max_chars && buf_len > seed_len {
            let seed = overlap_tail(&current_buf, overlap);
            chunks.push(std::mem::take(&mut current_buf));
            seed_len = seed.chars().count();
            current_buf = seed;
        }

        if para_len > max_chars {
            if current_buf.chars().count() > seed_len {
                chunks.push(std::mem::take(&mut current_buf));
            }
            current_buf.clear();
            seed_len = 0;
            chunks.extend(hard_split(trimmed, max_chars));
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if current_buf.chars().count() > seed_len {
        chunks.push(current_buf);
    }

    if chunks.is_empty() {
        chunks.push(text.trim().to_string());
    }

    chunks
}

/// Hard-split an oversized paragraph at the nearest newline or space.
fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let split_at = byte_index_of_char(remaining, max_chars);
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
    pieces
}

/// Up to `overlap` trailing chars of `chunk`, starting at a word boundary.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let total = chunk.chars().count();
    if total <= overlap {
        return String::new();
    }
    let start = byte_index_of_char(chunk, total - overlap);
    let tail = &chunk[start..];
    let tail = match tail.find(char::is_whitespace) {
        Some(ws) => &tail[ws..],
        None => tail,
    };
    tail.trim().to_string()
}

/// Byte offset of the `n`th char, or the string length.
fn byte_index_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
