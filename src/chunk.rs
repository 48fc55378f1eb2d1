//! Overlapping-window text chunker.
//!
//! Splits large texts into windows of at most `chunk_size` bytes with
//! `chunk_overlap` bytes of lookback between consecutive windows. Breaks
//! prefer the last space in a window when it lies past the midpoint, so
//! chunks end on word boundaries without degenerating into tiny pieces.
//!
//! Termination is guaranteed: the cursor is forced forward when the
//! overlap would not make progress (a single word longer than the window),
//! and the total chunk count is capped.

use tracing::warn;

/// Hard ceiling on the number of chunks produced for one text.
pub const MAX_CHUNKS: usize = 10_000;

/// Split `text` into overlapping chunks.
///
/// Texts of at most `chunk_size` bytes are returned whole. Each emitted
/// chunk is trimmed and non-empty, at most `chunk_size` bytes long, and
/// chunks appear in the order of the original text.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut prev_start = usize::MAX;

    while start < text.len() {
        // Safety net against a cursor that stops advancing.
        if start == prev_start {
            warn!("chunker stopped advancing at byte {start}");
            break;
        }
        prev_start = start;

        let mut end = floor_char_boundary(text, (start + chunk_size).min(text.len()));

        // Prefer a word boundary when it does not cost more than half the window.
        if end < text.len() {
            if let Some(last_space) = text[start..end].rfind(' ') {
                if last_space > chunk_size / 2 {
                    end = start + last_space;
                }
            }
        }

        let piece = text[start..end].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if chunks.len() >= MAX_CHUNKS {
            warn!("chunker hit the {MAX_CHUNKS} chunk ceiling, truncating");
            break;
        }

        // Step back by the overlap, forcing progress when that would stall.
        let mut next = end.saturating_sub(chunk_overlap);
        if next <= start {
            next = end;
        }
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        start = next;
    }

    chunks
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
