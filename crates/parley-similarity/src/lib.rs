//! # parley-similarity
//!
//! Text similarity and duplicate detection for generated responses.
//!
//! - Dice coefficient over character bigrams and word-set Jaccard
//! - Intra-turn repeat removal (`ANSWER ANSWER` -> `ANSWER`)
//! - Cross-turn repeat detection against recent assistant turns

pub mod cross_turn;
pub mod intra_turn;
pub mod normalize;
pub mod similarity;

pub use cross_turn::DuplicateDetector;
pub use intra_turn::remove_duplicate_response;
pub use normalize::FooterNormalizer;
pub use similarity::{normalize_words, string_similarity, word_jaccard_similarity};
