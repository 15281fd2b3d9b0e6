//! Footer stripping before similarity comparison.
//!
//! Delivered messages carry transport-added footers (Discord `-#` subtext
//! lines naming the model, guest-mode notices). History turns are stored as
//! delivered while fresh generations have no footer, so comparing them raw
//! understates similarity.

use once_cell::sync::Lazy;
use regex::Regex;

use parley_core::{Error, Result, TextNormalizer};

static DEFAULT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Discord subtext line
        r"^-#\s",
        // Attribution footer wrapped in emphasis or brackets: *Model: x*, (via: y)
        r"(?i)^[*_(\[]+\s*(?:model|generated by|via)\s*:.*[*_)\]]$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static footer regex"))
    .collect()
});

/// Strips trailing footer lines matching any configured pattern.
#[derive(Debug, Clone)]
pub struct FooterNormalizer {
    patterns: Vec<Regex>,
}

impl FooterNormalizer {
    /// Normalizer with the default footer patterns.
    pub fn new() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS.clone(),
        }
    }

    /// Add a footer line pattern.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid footer pattern {pattern:?}: {e}")))?;
        self.patterns.push(re);
        Ok(self)
    }

    fn is_footer_line(&self, line: &str) -> bool {
        let line = line.trim();
        line.is_empty() || self.patterns.iter().any(|re| re.is_match(line))
    }
}

impl Default for FooterNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextNormalizer for FooterNormalizer {
    fn normalize(&self, text: &str) -> String {
        let mut lines: Vec<&str> = text.lines().collect();
        while lines.last().is_some_and(|line| self.is_footer_line(line)) {
            lines.pop();
        }
        lines.join("\n").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_discord_subtext_footer() {
        let n = FooterNormalizer::new();
        let text = "Here is my answer.\n\n-# Model: deepseek/deepseek-r1\n-# Guest mode";
        assert_eq!(n.normalize(text), "Here is my answer.");
    }

    #[test]
    fn test_strips_attribution_footer() {
        let n = FooterNormalizer::new();
        assert_eq!(
            n.normalize("Answer body\n*Model: gpt-4o*"),
            "Answer body"
        );
    }

    #[test]
    fn test_strips_bracketed_attribution_footer() {
        let n = FooterNormalizer::new();
        assert_eq!(
            n.normalize("Answer body\n(generated by: parley)"),
            "Answer body"
        );
    }

    #[test]
    fn test_keeps_unframed_model_line() {
        let n = FooterNormalizer::new();
        let text = "Here are the specs you asked for.\nModel: the 2024 Civic comes with a 2.0L engine";
        assert_eq!(n.normalize(text), text);
    }

    #[test]
    fn test_keeps_half_framed_model_line() {
        let n = FooterNormalizer::new();
        let text = "Ranking below.\n*Model: the 2024 Civic tops the list";
        assert_eq!(n.normalize(text), text);
    }

    #[test]
    fn test_keeps_subtext_in_the_middle() {
        let n = FooterNormalizer::new();
        let text = "-# small print\nActual content";
        assert_eq!(n.normalize(text), text);
    }

    #[test]
    fn test_no_footer_only_trims() {
        let n = FooterNormalizer::new();
        assert_eq!(n.normalize("  plain  \n"), "plain");
    }

    #[test]
    fn test_custom_pattern() {
        let n = FooterNormalizer::new().with_pattern(r"^~~ sent via relay").unwrap();
        assert_eq!(n.normalize("hi there\n~~ sent via relay ~~"), "hi there");
    }

    #[test]
    fn test_invalid_custom_pattern_is_config_error() {
        let err = FooterNormalizer::new().with_pattern("(unclosed").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
