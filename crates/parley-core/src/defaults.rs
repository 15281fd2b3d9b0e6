//! Centralized default constants for the parley worker.
//!
//! **This module is the single source of truth** for shared tunables. Crates
//! reference these constants instead of defining their own magic numbers.
//!
//! Organized by domain area.

// =============================================================================
// GENERATION RETRY LADDER
// =============================================================================

/// Maximum generation attempts per job (first try plus two retries).
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// Lower bound of the jittered retry temperature.
pub const RETRY_TEMPERATURE_MIN: f32 = 0.95;

/// Upper bound of the jittered retry temperature.
pub const RETRY_TEMPERATURE_MAX: f32 = 1.0;

/// Frequency penalty applied from the second attempt on.
pub const RETRY_FREQUENCY_PENALTY: f32 = 0.5;

/// Fraction of the oldest conversation history dropped from the third attempt on.
pub const RETRY_HISTORY_REDUCTION: f32 = 0.3;

// =============================================================================
// DUPLICATE DETECTION
// =============================================================================

/// Responses shorter than this (in chars) are never checked for intra-turn repeats.
pub const INTRA_TURN_MIN_LENGTH: usize = 100;

/// Maximum anchor length (in chars) used to locate a repeated response start.
pub const INTRA_TURN_ANCHOR_MAX: usize = 30;

/// Bigram similarity at which a split response counts as duplicated.
pub const INTRA_TURN_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Acceptable head/tail length ratio window for fuzzy intra-turn comparison.
pub const INTRA_TURN_LENGTH_RATIO_MIN: f64 = 0.5;
pub const INTRA_TURN_LENGTH_RATIO_MAX: f64 = 2.0;

/// Bigram similarity at which a response counts as repeating an earlier turn.
pub const CROSS_TURN_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Short-response floor: strings shorter than this are never cross-turn duplicates.
pub const CROSS_TURN_MIN_LENGTH: usize = 30;

/// How many prior assistant turns are scanned for cross-turn duplicates.
pub const CROSS_TURN_LOOKBACK: usize = 5;

// =============================================================================
// THINKING EXTRACTION
// =============================================================================

/// Separator used when joining multiple extracted thinking blocks.
pub const THINKING_BLOCK_SEPARATOR: &str = "\n\n---\n\n";

// =============================================================================
// SIDE EFFECTS
// =============================================================================

/// Attempts made to write a usage ledger entry before giving up.
pub const USAGE_LOG_MAX_ATTEMPTS: u32 = 3;

/// Base delay between usage ledger attempts (multiplied by attempt number).
pub const USAGE_LOG_RETRY_DELAY_MS: u64 = 100;

/// Lifetime of cached job results.
pub const RESULT_CACHE_TTL_SECS: u64 = 3600;

/// Expiry of idempotency locks in the in-memory lock service.
///
/// Production lock services own their own TTL; this value only bounds the
/// local implementation so an abandoned job never blocks redelivery forever.
pub const IDEMPOTENCY_LOCK_TTL_SECS: u64 = 300;

/// Key used in result cache keys when the requester is anonymous.
pub const UNKNOWN_USER_KEY: &str = "unknown";

/// Request type recorded in usage ledger entries for generation jobs.
pub const USAGE_REQUEST_TYPE: &str = "llm_generation";

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Default queue poll interval when no job is available, in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Default job execution timeout in seconds (5 minutes).
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Default worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;
