//! Intra-turn duplicate removal.
//!
//! When a model misses its stop token it sometimes starts the whole answer
//! over, producing `ANSWER ANSWER` (or `ANSWER ANSW` when cut off by the
//! length limit). The repeat is found by searching for a second occurrence of
//! the response's opening characters and comparing the two halves.

use tracing::{debug, trace};

use parley_core::defaults::{
    INTRA_TURN_ANCHOR_MAX, INTRA_TURN_LENGTH_RATIO_MAX, INTRA_TURN_LENGTH_RATIO_MIN,
    INTRA_TURN_MIN_LENGTH, INTRA_TURN_SIMILARITY_THRESHOLD,
};

use crate::similarity::string_similarity;

/// Remove a repeated copy of the response from its own tail.
///
/// Returns the first copy with trailing whitespace trimmed when a repeat is
/// found, otherwise the content unchanged. Content shorter than 100 chars is
/// never modified.
///
/// # Examples
///
/// ```
/// use parley_similarity::remove_duplicate_response;
///
/// let answer = "The tide rises twice a day because the moon's gravity pulls the oceans toward it and away from it. ";
/// let doubled = format!("{answer}{answer}");
/// assert_eq!(remove_duplicate_response(&doubled), answer.trim_end());
///
/// assert_eq!(remove_duplicate_response("short"), "short");
/// ```
pub fn remove_duplicate_response(content: &str) -> &str {
    let char_count = content.chars().count();
    if char_count < INTRA_TURN_MIN_LENGTH {
        return content;
    }

    let anchor_chars = INTRA_TURN_ANCHOR_MAX.min(char_count / 3);
    let anchor_end = content
        .char_indices()
        .nth(anchor_chars)
        .map_or(content.len(), |(i, _)| i);
    let anchor = &content[..anchor_end];
    if anchor.trim().is_empty() {
        return content;
    }

    let mut search_from = anchor_end;
    while let Some(offset) = content[search_from..].find(anchor) {
        let split = search_from + offset;
        let head = content[..split].trim();
        let tail = content[split..].trim();

        if let Some(similarity) = split_similarity(head, tail) {
            trace!(split, similarity, "Intra-turn split candidate");
            if similarity >= INTRA_TURN_SIMILARITY_THRESHOLD {
                debug!(
                    original_len = content.len(),
                    kept_len = split,
                    similarity,
                    "Removed intra-turn duplicate"
                );
                return content[..split].trim_end();
            }
        }

        // Advance past the first char of this occurrence.
        let step = content[split..].chars().next().map_or(1, char::len_utf8);
        search_from = split + step;
    }

    content
}

/// Similarity of the two halves of a candidate split, or `None` if their
/// lengths are too far apart to be copies of each other.
fn split_similarity(head: &str, tail: &str) -> Option<f64> {
    if head.is_empty() || tail.is_empty() {
        return None;
    }

    // Truncated repeat, or a repeat that continued past the original.
    if head.starts_with(tail) || tail.starts_with(head) {
        return Some(1.0);
    }

    let ratio = head.chars().count() as f64 / tail.chars().count() as f64;
    if !(INTRA_TURN_LENGTH_RATIO_MIN..=INTRA_TURN_LENGTH_RATIO_MAX).contains(&ratio) {
        return None;
    }

    Some(string_similarity(head, tail))
}
