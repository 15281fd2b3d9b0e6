//! Cross-turn duplicate detection.
//!
//! Some providers serve a cached completion for a near-identical request,
//! so the persona repeats an earlier answer word for word. A fresh response
//! is compared against the last few assistant turns, newest first.

use std::sync::Arc;

use tracing::debug;

use parley_core::defaults::{
    CROSS_TURN_LOOKBACK, CROSS_TURN_MIN_LENGTH, CROSS_TURN_SIMILARITY_THRESHOLD,
};
use parley_core::{DuplicateVerdict, TextNormalizer};

use crate::normalize::FooterNormalizer;
use crate::similarity::string_similarity;

/// Compares responses against earlier assistant turns.
#[derive(Clone)]
pub struct DuplicateDetector {
    normalizer: Arc<dyn TextNormalizer>,
    threshold: f64,
    min_length: usize,
    lookback: usize,
}

impl DuplicateDetector {
    /// Detector with the default thresholds and the given normalizer.
    pub fn new(normalizer: Arc<dyn TextNormalizer>) -> Self {
        Self {
            normalizer,
            threshold: CROSS_TURN_SIMILARITY_THRESHOLD,
            min_length: CROSS_TURN_MIN_LENGTH,
            lookback: CROSS_TURN_LOOKBACK,
        }
    }

    /// Override the similarity threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Override how many prior turns are scanned.
    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    /// Number of prior assistant turns this detector scans.
    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Similarity of two responses after footer normalization.
    ///
    /// `None` when either side is below the short-response floor, where
    /// legitimate repeats ("Thanks!") are common.
    pub fn similarity(&self, candidate: &str, previous: &str) -> Option<f64> {
        let candidate = self.normalizer.normalize(candidate);
        let previous = self.normalizer.normalize(previous);

        if candidate.chars().count() < self.min_length || previous.chars().count() < self.min_length
        {
            return None;
        }

        Some(string_similarity(&candidate, &previous))
    }

    /// Whether `candidate` repeats `previous`.
    pub fn is_cross_turn_duplicate(&self, candidate: &str, previous: &str) -> bool {
        self.similarity(candidate, previous)
            .is_some_and(|s| s >= self.threshold)
    }

    /// Search the most recent assistant turns (newest first) for a repeat.
    ///
    /// Returns the newest match; `match_index` counts turns back from 1.
    pub fn is_recent_duplicate(&self, candidate: &str, recent: &[&str]) -> DuplicateVerdict {
        for (i, previous) in recent.iter().take(self.lookback).enumerate() {
            let Some(similarity) = self.similarity(candidate, previous) else {
                continue;
            };
            if similarity >= self.threshold {
                debug!(
                    turns_back = i + 1,
                    similarity, "Cross-turn duplicate detected"
                );
                return DuplicateVerdict::matched(i + 1, similarity);
            }
        }
        DuplicateVerdict::not_duplicate()
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(Arc::new(FooterNormalizer::new()))
    }
}
