//! String similarity measures.
//!
//! - [`string_similarity`]: Dice coefficient over character bigrams,
//!   sensitive to wording and order, used for duplicate detection.
//! - [`word_jaccard_similarity`]: Jaccard index over normalized word sets,
//!   insensitive to order and markdown emphasis.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_~`]+").expect("static emphasis regex"));

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s']").expect("static punctuation regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static whitespace regex"));

/// Dice coefficient over character bigrams, case-insensitive, ignoring
/// surrounding whitespace.
///
/// Returns a value in `[0.0, 1.0]`. Empty input always scores 0; identical
/// non-empty input always scores 1.
///
/// # Examples
///
/// ```
/// use parley_similarity::string_similarity;
///
/// assert_eq!(string_similarity("Hello", "hello "), 1.0);
/// assert_eq!(string_similarity("", ""), 0.0);
/// assert!(string_similarity("night", "nacht") < 0.5);
/// ```
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.len() < 2 || b_chars.len() < 2 {
        return 0.0;
    }

    let mut a_bigrams: HashMap<(char, char), usize> = HashMap::new();
    for pair in a_chars.windows(2) {
        *a_bigrams.entry((pair[0], pair[1])).or_insert(0) += 1;
    }

    let mut intersection = 0usize;
    for pair in b_chars.windows(2) {
        if let Some(count) = a_bigrams.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                intersection += 1;
            }
        }
    }

    let total = (a_chars.len() - 1) + (b_chars.len() - 1);
    (2.0 * intersection as f64) / total as f64
}

/// Normalize text for word-level comparison: strip emphasis markers and
/// punctuation (apostrophes kept), collapse whitespace, lowercase.
pub fn normalize_words(text: &str) -> String {
    let text = EMPHASIS.replace_all(text, "");
    let text = PUNCTUATION.replace_all(&text, " ");
    WHITESPACE
        .replace_all(&text, " ")
        .trim()
        .to_lowercase()
}

/// Jaccard index of the normalized word sets of `a` and `b`.
///
/// Returns 0 when either side has no words.
pub fn word_jaccard_similarity(a: &str, b: &str) -> f64 {
    let a_norm = normalize_words(a);
    let b_norm = normalize_words(b);

    let a_words: HashSet<&str> = a_norm.split_whitespace().collect();
    let b_words: HashSet<&str> = b_norm.split_whitespace().collect();

    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }

    let intersection = a_words.intersection(&b_words).count();
    let union = a_words.union(&b_words).count();
    intersection as f64 / union as f64
}
