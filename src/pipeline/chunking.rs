//! Overlapping character-window chunker with sentence-boundary snapping.
//!
//! The chunker is a pure function: identical `(text, max_chunk_size, overlap)` inputs
//! always produce an identical chunk list, and chunk counts feed directly into the
//! document's `total_chunks` accounting, so determinism is a hard requirement here.

use thiserror::Error;

/// Errors produced while splitting text into chunks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    /// A zero-character window can never make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Split text into ordered, overlapping chunks.
///
/// Texts at or under `max_chunk_size` characters are returned whole. Longer texts are
/// windowed: each window ends at `start + max_chunk_size`, snapped back to the nearest
/// sentence-terminating period when one exists after the window start, and the next
/// window begins `overlap` characters before the previous end. Results are trimmed and
/// empty chunks dropped.
pub fn chunk_text(
    text: &str,
    max_chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>, ChunkingError> {
    if max_chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chunk_size {
        return Ok(vec![text.to_string()]);
    }

    // Overlap must leave room for forward progress.
    let overlap = overlap.min(max_chunk_size - 1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + max_chunk_size).min(chars.len());

        // Snap intermediate windows back to a sentence boundary, provided the
        // period lands strictly after the window start.
        if end < chars.len()
            && let Some(offset) = chars[start..end].iter().rposition(|c| *c == '.')
            && offset > 0
        {
            end = start + offset + 1;
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }

        if end == chars.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        // A short snapped window could otherwise rewind behind the current start.
        start = if next > start { next } else { end };
    }

    Ok(chunks)
}
