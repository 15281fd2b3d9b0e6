//! Structured logging schema, field name constants, and subscriber setup.
//!
//! The constants name the structured fields shared by the router, the
//! generation ladder and the worker. Event macros take field names as
//! identifiers and spell them out literally; span fields filled in after
//! the fact (`Span::record`) go through these constants.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Side effect exhausted and data was dropped (usage ledger) |
//! | WARN  | Recoverable issue, job outcome unaffected |
//! | INFO  | Job lifecycle (received, completed, failed) |
//! | DEBUG | Decision points (duplicate checks, overrides, cache keys) |
//! | TRACE | Per-candidate iteration (intra-turn split candidates) |

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID carried in every job payload.
pub const REQUEST_ID: &str = "request_id";

/// Queue-assigned job ID.
pub const JOB_ID: &str = "job_id";

/// Job type wire name.
pub const JOB_TYPE: &str = "job_type";

/// External trigger message ID used as the idempotency key.
pub const TRIGGER_MESSAGE_ID: &str = "trigger_message_id";

/// Persona name the response is generated for.
pub const PERSONA: &str = "persona";

// ─── Generation fields ─────────────────────────────────────────────────────

/// 1-based generation attempt number.
pub const ATTEMPT: &str = "attempt";

/// Model name reported by the provider.
pub const MODEL: &str = "model";

/// Provider name reported by the provider.
pub const PROVIDER: &str = "provider";

/// Classified error category.
pub const ERROR_CATEGORY: &str = "error_category";

/// Similarity score of a duplicate check.
pub const SIMILARITY: &str = "similarity";

/// How many assistant turns back a duplicate matched.
pub const TURNS_BACK: &str = "turns_back";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Character length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

// ─── Subscriber setup ──────────────────────────────────────────────────────

/// Default filter directive when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "parley=info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Line format.
    pub format: LogFormat,
    /// Force ANSI colors on or off; `None` lets the formatter decide.
    pub ansi: Option<bool>,
}

impl LogConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LOG_FORMAT` | `text` | `json` for structured output |
    /// | `LOG_ANSI` | unset | `true`/`false` to force colors |
    pub fn from_env() -> Self {
        let format = match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let ansi = std::env::var("LOG_ANSI")
            .ok()
            .map(|v| v != "false" && v != "0");

        Self { format, ansi }
    }
}

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = config.ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).try_init()
        }
    };

    installed.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default_is_text() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.ansi.is_none());
    }

    #[test]
    fn test_init_tracing_twice_fails_second_time() {
        let config = LogConfig {
            format: LogFormat::Json,
            ansi: Some(false),
        };
        // Another test in this binary may already have installed one, so only
        // the second call is asserted.
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_field_names_are_unique() {
        let names = [
            REQUEST_ID,
            JOB_ID,
            JOB_TYPE,
            TRIGGER_MESSAGE_ID,
            PERSONA,
            ATTEMPT,
            MODEL,
            PROVIDER,
            ERROR_CATEGORY,
            SIMILARITY,
            TURNS_BACK,
            DURATION_MS,
            RESPONSE_LEN,
            SUCCESS,
            ERROR_MSG,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_constants_match_declared_span_fields() {
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!(
                "process_job",
                job_id = "job-1",
                success = tracing::field::Empty,
                duration_ms = tracing::field::Empty,
                attempt = tracing::field::Empty,
            );
            for name in [JOB_ID, SUCCESS, DURATION_MS, ATTEMPT] {
                assert!(span.field(name).is_some(), "missing field {name}");
            }
            assert!(span.field("no_such_field").is_none());
        });
    }
}
