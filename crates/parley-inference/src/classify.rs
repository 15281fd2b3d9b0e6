//! Provider failure classification.
//!
//! Maps a [`ProviderError`] onto an [`ErrorCategory`]: HTTP status first,
//! then keywords in the provider's error code and message. When a backend
//! wraps a retry-exhaustion error, the unwrapped cause is classified while
//! the wrapper's message stays the user-visible one.

use tracing::debug;

use parley_core::{ErrorCategory, ErrorInfo, GenerationFailure, ProviderError};

/// Keyword table, checked in order against the lowercased code and message.
const KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::QuotaExceeded,
        &["insufficient_quota", "quota", "credits", "billing"],
    ),
    (
        ErrorCategory::Authentication,
        &[
            "invalid_api_key",
            "api key",
            "unauthorized",
            "authentication",
            "permission denied",
        ],
    ),
    (
        ErrorCategory::RateLimit,
        &["rate_limit", "rate limit", "too many requests"],
    ),
    (
        ErrorCategory::ContextLengthExceeded,
        &[
            "context_length",
            "context length",
            "maximum context",
            "too many tokens",
        ],
    ),
    (
        ErrorCategory::ModelNotFound,
        &["model_not_found", "model not found", "no such model"],
    ),
    (
        ErrorCategory::ContentFilter,
        &["content_filter", "content filter", "moderation", "safety"],
    ),
    (ErrorCategory::Timeout, &["timeout", "timed out"]),
    (
        ErrorCategory::Network,
        &[
            "econnreset",
            "econnrefused",
            "socket hang up",
            "network",
            "connection",
        ],
    ),
];

/// Classify a provider error. An absent error classifies as unknown.
pub fn classify_provider_error(error: Option<&ProviderError>) -> ErrorCategory {
    let Some(error) = error else {
        return ErrorCategory::Unknown;
    };

    let haystack = format!(
        "{} {}",
        error.code.as_deref().unwrap_or_default(),
        error.message
    )
    .to_lowercase();
    let keyword = classify_keywords(&haystack);

    match error.status {
        Some(401 | 403) => ErrorCategory::Authentication,
        Some(402) => ErrorCategory::QuotaExceeded,
        Some(404) => ErrorCategory::ModelNotFound,
        Some(408 | 504) => ErrorCategory::Timeout,
        Some(429) if keyword == Some(ErrorCategory::QuotaExceeded) => ErrorCategory::QuotaExceeded,
        Some(429) => ErrorCategory::RateLimit,
        Some(500..=599) => ErrorCategory::ServerError,
        _ => keyword.unwrap_or(ErrorCategory::Unknown),
    }
}

/// Classify a generation failure into the error info attached to results.
pub fn classify_failure(failure: &GenerationFailure) -> ErrorInfo {
    let cause = failure.cause();
    let category = classify_provider_error(cause);
    debug!(
        error_category = %category,
        status = cause.and_then(|c| c.status),
        wrapped = failure.attempts().is_some(),
        "Classified generation failure"
    );
    let info = ErrorInfo::new(category).with_attempts(failure.attempts());
    match cause {
        Some(c) => info.with_technical_message(c.message.clone()),
        None => info,
    }
}

fn classify_keywords(haystack: &str) -> Option<ErrorCategory> {
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| haystack.contains(w)))
        .map(|(category, _)| *category)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Status Tests
    // ==========================================================================

    #[test]
    fn test_status_401_is_authentication() {
        let err = ProviderError::new("bad key").with_status(401);
        assert_eq!(
            classify_provider_error(Some(&err)),
            ErrorCategory::Authentication
        );
    }

    #[test]
    fn test_status_429_is_rate_limit() {
        let err = ProviderError::new("slow down").with_status(429);
        assert_eq!(classify_provider_error(Some(&err)), ErrorCategory::RateLimit);
    }

    #[test]
    fn test_status_429_with_quota_code_is_quota() {
        let err = ProviderError::new("You exceeded your current quota")
            .with_status(429)
            .with_code("insufficient_quota");
        assert_eq!(
            classify_provider_error(Some(&err)),
            ErrorCategory::QuotaExceeded
        );
    }

    #[test]
    fn test_status_5xx_is_server_error() {
        for status in [500, 502, 503] {
            let err = ProviderError::new("upstream").with_status(status);
            assert_eq!(
                classify_provider_error(Some(&err)),
                ErrorCategory::ServerError
            );
        }
    }

    #[test]
    fn test_status_504_is_timeout() {
        let err = ProviderError::new("gateway").with_status(504);
        assert_eq!(classify_provider_error(Some(&err)), ErrorCategory::Timeout);
    }

    #[test]
    fn test_status_400_falls_back_to_keywords() {
        let err = ProviderError::new("This model's maximum context length is 8192 tokens")
            .with_status(400);
        assert_eq!(
            classify_provider_error(Some(&err)),
            ErrorCategory::ContextLengthExceeded
        );
    }

    // ==========================================================================
    // Keyword Tests
    // ==========================================================================

    #[test]
    fn test_keyword_classification_without_status() {
        let cases = [
            ("Invalid API key provided", ErrorCategory::Authentication),
            ("Rate limit reached for requests", ErrorCategory::RateLimit),
            ("request timed out", ErrorCategory::Timeout),
            ("socket hang up", ErrorCategory::Network),
            ("flagged by moderation", ErrorCategory::ContentFilter),
            ("something odd happened", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            let err = ProviderError::new(message);
            assert_eq!(classify_provider_error(Some(&err)), expected, "{message}");
        }
    }

    #[test]
    fn test_absent_error_is_unknown() {
        assert_eq!(classify_provider_error(None), ErrorCategory::Unknown);
    }

    // ==========================================================================
    // Failure Tests
    // ==========================================================================

    #[test]
    fn test_wrapped_failure_classifies_cause() {
        let failure = GenerationFailure::Wrapped {
            message: "Generation failed after 3 attempts".to_string(),
            attempts: 3,
            cause: Some(ProviderError::new("Unauthorized").with_status(401)),
        };

        let info = classify_failure(&failure);
        assert_eq!(info.category, ErrorCategory::Authentication);
        assert!(!info.is_transient);
        assert_eq!(info.attempts, Some(3));
        assert_eq!(info.technical_message.as_deref(), Some("Unauthorized"));
        // The outer message is untouched for display.
        assert_eq!(failure.to_string(), "Generation failed after 3 attempts");
    }

    #[test]
    fn test_wrapped_failure_without_cause_is_unknown() {
        let failure = GenerationFailure::Wrapped {
            message: "Retries exhausted".to_string(),
            attempts: 2,
            cause: None,
        };

        let info = classify_failure(&failure);
        assert_eq!(info.category, ErrorCategory::Unknown);
        assert!(info.technical_message.is_none());
    }

    #[test]
    fn test_direct_rate_limit_is_transient() {
        let failure: GenerationFailure = ProviderError::new("429").with_status(429).into();
        let info = classify_failure(&failure);
        assert_eq!(info.category, ErrorCategory::RateLimit);
        assert!(info.is_transient);
        assert!(info.attempts.is_none());
    }
}
