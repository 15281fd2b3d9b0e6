//! Collaborator traits for the job-execution core.
//!
//! Everything the worker talks to lives behind one of these traits:
//! the model provider, the idempotency lock service, the result cache,
//! durable delivery storage, the result stream, the usage ledger, the memory
//! store and the queue transport. Concrete implementations are pluggable,
//! which also keeps the core testable without any of them running.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// GENERATION
// =============================================================================

/// Model provider that turns a prompt plus context into a response.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a response.
    ///
    /// `context` is a per-attempt copy; implementations may mutate it freely.
    async fn generate(
        &self,
        persona: &Persona,
        message: &str,
        context: &mut ConversationContext,
        overrides: &GenerationOverrides,
        auth: &ResolvedAuth,
    ) -> std::result::Result<GenerationOutput, GenerationFailure>;
}

/// Strips transport-added decoration before similarity comparison.
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> String;
}

/// Normalizer that only trims whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughNormalizer;

impl TextNormalizer for PassthroughNormalizer {
    fn normalize(&self, text: &str) -> String {
        text.trim().to_string()
    }
}

// =============================================================================
// IDEMPOTENCY
// =============================================================================

/// Distributed mutual-exclusion marker keyed by the trigger message ID.
///
/// Expiry of held locks is owned by the implementation.
#[async_trait]
pub trait IdempotencyLock: Send + Sync {
    /// Try to claim `key`. Returns false if it is already held.
    async fn acquire(&self, key: &str) -> Result<bool>;

    /// Release a previously acquired key.
    async fn release(&self, key: &str) -> Result<()>;
}

// =============================================================================
// RESULT DELIVERY
// =============================================================================

/// Short-lived cache of job results, keyed `{userId|unknown}:{jobId|requestId}`.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn store(&self, key: &str, result: &JobResult) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<JobResult>>;

    /// Remove expired entries; returns how many were removed.
    async fn cleanup_expired(&self) -> Result<usize>;
}

/// Durable storage of results awaiting delivery.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn persist(&self, record: &DeliveryRecord) -> Result<()>;
}

/// Stream that delivery consumers read finished results from.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    async fn publish(&self, job_id: &str, request_id: &str, result: &JobResult) -> Result<()>;
}

// =============================================================================
// ACCOUNTING AND MEMORY
// =============================================================================

/// Per-user token usage ledger.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record_usage(&self, record: &UsageRecord) -> Result<()>;
}

/// Long-term memory store for persona conversations.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store_deferred_memory(
        &self,
        persona: &Persona,
        context: &ConversationContext,
        data: &JsonValue,
    ) -> Result<()>;
}

// =============================================================================
// QUEUE TRANSPORT
// =============================================================================

/// Queue the worker pulls jobs from.
///
/// Delivery is at-least-once; a job that is neither completed nor failed is
/// redelivered by the transport.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Next available job, or `None` when the queue is empty.
    async fn next_job(&self) -> Result<Option<Job>>;

    /// Acknowledge a processed job with its result.
    async fn complete(&self, job: &Job, result: &JobResult) -> Result<()>;

    /// Report a job whose handler raised; the transport decides on redelivery.
    async fn fail(&self, job: &Job, error: &str) -> Result<()>;
}
