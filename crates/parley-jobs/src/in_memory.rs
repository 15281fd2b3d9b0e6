//! In-memory collaborators for tests and local runs.
//!
//! Each recording collaborator can be told to fail its first `n` calls,
//! which is how side-effect isolation and retry paths are exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::debug;

use parley_core::defaults::{EVENT_BUS_CAPACITY, IDEMPOTENCY_LOCK_TTL_SECS, RESULT_CACHE_TTL_SECS};
use parley_core::{
    ConversationContext, DeliveryRecord, DeliveryStore, Error, IdempotencyLock, Job, JobResult,
    JobSource, MemoryStore, Persona, Result, ResultCache, ResultPublisher, UsageLedger,
    UsageRecord,
};

/// Countdown of injected failures.
#[derive(Debug, Default)]
struct FailureBudget {
    remaining: AtomicU32,
    calls: AtomicU32,
}

impl FailureBudget {
    fn new(failures: u32) -> Self {
        Self {
            remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    /// Count a call; true if this call should fail.
    fn should_fail(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

// =============================================================================
// IDEMPOTENCY LOCK
// =============================================================================

/// Idempotency lock with per-key expiry.
///
/// An entry older than the TTL no longer blocks `acquire`, so a job
/// abandoned mid-flight can be redelivered once the TTL passes. Every
/// `acquire` sweeps expired entries, so the map holds at most the keys
/// claimed within one TTL. The lock is process-local.
#[derive(Debug)]
pub struct InMemoryIdempotencyLock {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl InMemoryIdempotencyLock {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(IDEMPOTENCY_LOCK_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Whether `key` is currently held.
    pub async fn is_held(&self, key: &str) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .is_some_and(|acquired| acquired.elapsed() < self.ttl)
    }
}

impl Default for InMemoryIdempotencyLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyLock for InMemoryIdempotencyLock {
    async fn acquire(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, acquired| acquired.elapsed() < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Evicted expired idempotency locks");
        }

        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Instant::now());
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

// =============================================================================
// RESULT CACHE
// =============================================================================

/// Result cache with TTL expiry.
#[derive(Debug)]
pub struct InMemoryResultCache {
    entries: Mutex<HashMap<String, (JobResult, Instant)>>,
    ttl: Duration,
    cleanup_failures: FailureBudget,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(RESULT_CACHE_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            cleanup_failures: FailureBudget::default(),
        }
    }

    /// Fail the first `n` cleanup calls.
    pub fn failing_cleanup(mut self, n: u32) -> Self {
        self.cleanup_failures = FailureBudget::new(n);
        self
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of cleanup calls made.
    pub fn cleanup_calls(&self) -> u32 {
        self.cleanup_failures.calls()
    }
}

impl Default for InMemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn store(&self, key: &str, result: &JobResult) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (result.clone(), Instant::now()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<JobResult>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|(_, stored)| stored.elapsed() < self.ttl)
            .map(|(result, _)| result.clone()))
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        if self.cleanup_failures.should_fail() {
            return Err(Error::Cache("injected cleanup failure".into()));
        }
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, (_, stored)| stored.elapsed() < self.ttl);
        Ok(before - entries.len())
    }
}

// =============================================================================
// DELIVERY STORE
// =============================================================================

/// Delivery store that keeps records in memory.
///
/// Records are never drained; for tests and short local runs.
#[derive(Debug, Default)]
pub struct RecordingDeliveryStore {
    records: Mutex<Vec<DeliveryRecord>>,
    failures: FailureBudget,
}

impl RecordingDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` persist calls.
    pub fn failing(n: u32) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            failures: FailureBudget::new(n),
        }
    }

    pub async fn records(&self) -> Vec<DeliveryRecord> {
        self.records.lock().await.clone()
    }

    pub fn calls(&self) -> u32 {
        self.failures.calls()
    }
}

#[async_trait]
impl DeliveryStore for RecordingDeliveryStore {
    async fn persist(&self, record: &DeliveryRecord) -> Result<()> {
        if self.failures.should_fail() {
            return Err(Error::Persistence("injected persist failure".into()));
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

// =============================================================================
// PUBLISHER
// =============================================================================

/// A result as published to the stream.
#[derive(Debug, Clone)]
pub struct PublishedResult {
    pub job_id: String,
    pub request_id: String,
    pub result: JobResult,
}

/// Publisher backed by a tokio broadcast channel.
///
/// Publishing with no subscribers is not an error.
#[derive(Debug)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedResult>,
    failures: FailureBudget,
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            tx,
            failures: FailureBudget::default(),
        }
    }

    /// Fail the first `n` publish calls.
    pub fn failing(n: u32) -> Self {
        Self {
            failures: FailureBudget::new(n),
            ..Self::new()
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedResult> {
        self.tx.subscribe()
    }

    pub fn calls(&self) -> u32 {
        self.failures.calls()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultPublisher for BroadcastPublisher {
    async fn publish(&self, job_id: &str, request_id: &str, result: &JobResult) -> Result<()> {
        if self.failures.should_fail() {
            return Err(Error::Publish("injected publish failure".into()));
        }
        let receivers = self
            .tx
            .send(PublishedResult {
                job_id: job_id.to_string(),
                request_id: request_id.to_string(),
                result: result.clone(),
            })
            .unwrap_or(0);
        debug!(job_id, receivers, "Published job result");
        Ok(())
    }
}

// =============================================================================
// USAGE LEDGER
// =============================================================================

/// Usage ledger that keeps records in memory.
///
/// Records are never drained; for tests and short local runs.
#[derive(Debug, Default)]
pub struct RecordingUsageLedger {
    records: Mutex<Vec<UsageRecord>>,
    failures: FailureBudget,
}

impl RecordingUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` record calls.
    pub fn failing(n: u32) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            failures: FailureBudget::new(n),
        }
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().await.clone()
    }

    pub fn calls(&self) -> u32 {
        self.failures.calls()
    }
}

#[async_trait]
impl UsageLedger for RecordingUsageLedger {
    async fn record_usage(&self, record: &UsageRecord) -> Result<()> {
        if self.failures.should_fail() {
            return Err(Error::Usage("injected usage failure".into()));
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// A stored deferred memory.
#[derive(Debug, Clone)]
pub struct StoredMemory {
    pub persona_id: String,
    pub channel_id: Option<String>,
    pub data: JsonValue,
}

/// Memory store that keeps entries in memory.
#[derive(Debug, Default)]
pub struct RecordingMemoryStore {
    entries: Mutex<Vec<StoredMemory>>,
    failures: FailureBudget,
}

impl RecordingMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` store calls.
    pub fn failing(n: u32) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            failures: FailureBudget::new(n),
        }
    }

    pub async fn entries(&self) -> Vec<StoredMemory> {
        self.entries.lock().await.clone()
    }

    pub fn calls(&self) -> u32 {
        self.failures.calls()
    }
}

#[async_trait]
impl MemoryStore for RecordingMemoryStore {
    async fn store_deferred_memory(
        &self,
        persona: &Persona,
        context: &ConversationContext,
        data: &JsonValue,
    ) -> Result<()> {
        if self.failures.should_fail() {
            return Err(Error::Memory("injected memory failure".into()));
        }
        self.entries.lock().await.push(StoredMemory {
            persona_id: persona.id.clone(),
            channel_id: context.channel_id.clone(),
            data: data.clone(),
        });
        Ok(())
    }
}

// =============================================================================
// JOB QUEUE
// =============================================================================

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Job>,
    completed: Vec<(Job, JobResult)>,
    failed: Vec<(Job, String)>,
}

/// FIFO job source. Failed jobs are recorded, not redelivered.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, job: Job) {
        self.state.lock().await.pending.push_back(job);
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn completed(&self) -> Vec<(Job, JobResult)> {
        self.state.lock().await.completed.clone()
    }

    pub async fn failed(&self) -> Vec<(Job, String)> {
        self.state.lock().await.failed.clone()
    }
}

#[async_trait]
impl JobSource for InMemoryJobQueue {
    async fn next_job(&self) -> Result<Option<Job>> {
        Ok(self.state.lock().await.pending.pop_front())
    }

    async fn complete(&self, job: &Job, result: &JobResult) -> Result<()> {
        self.state
            .lock()
            .await
            .completed
            .push((job.clone(), result.clone()));
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .failed
            .push((job.clone(), error.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Lock Tests
    // ==========================================================================

    #[tokio::test]
    async fn test_lock_acquire_is_exclusive() {
        let lock = InMemoryIdempotencyLock::new();
        assert!(lock.acquire("msg-1").await.unwrap());
        assert!(!lock.acquire("msg-1").await.unwrap());
        assert!(lock.acquire("msg-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_release_allows_reacquire() {
        let lock = InMemoryIdempotencyLock::new();
        assert!(lock.acquire("msg-1").await.unwrap());
        lock.release("msg-1").await.unwrap();
        assert!(!lock.is_held("msg-1").await);
        assert!(lock.acquire("msg-1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_expires_after_ttl() {
        let lock = InMemoryIdempotencyLock::with_ttl(Duration::from_secs(10));
        assert!(lock.acquire("msg-1").await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!lock.acquire("msg-1").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(lock.acquire("msg-1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_acquire_evicts_expired_keys() {
        let lock = InMemoryIdempotencyLock::with_ttl(Duration::from_secs(1));
        for i in 0..1000 {
            assert!(lock.acquire(&format!("msg-{i}")).await.unwrap());
        }
        assert_eq!(lock.entries.lock().await.len(), 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(lock.acquire("fresh").await.unwrap());

        let entries = lock.entries.lock().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("fresh"));
    }

    // ==========================================================================
    // Cache Tests
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry_and_cleanup() {
        let cache = InMemoryResultCache::with_ttl(Duration::from_secs(60));
        let result = JobResult::success("req-1", "hi", None);
        cache.store("u:1", &result).await.unwrap();
        assert_eq!(cache.get("u:1").await.unwrap(), Some(result));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("u:1").await.unwrap(), None);
        assert_eq!(cache.len().await, 1);

        assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_cache_injected_cleanup_failure() {
        let cache = InMemoryResultCache::new().failing_cleanup(1);
        assert!(matches!(cache.cleanup_expired().await, Err(Error::Cache(_))));
        assert_eq!(cache.cleanup_expired().await.unwrap(), 0);
        assert_eq!(cache.cleanup_calls(), 2);
    }

    // ==========================================================================
    // Recording Collaborator Tests
    // ==========================================================================

    #[tokio::test]
    async fn test_usage_ledger_fails_first_n_calls() {
        let ledger = RecordingUsageLedger::failing(2);
        let record = UsageRecord {
            user_id: "u-1".into(),
            provider: "openrouter".into(),
            model: "m".into(),
            tokens_in: 1,
            tokens_out: 2,
            request_type: "llm_generation".into(),
        };

        assert!(ledger.record_usage(&record).await.is_err());
        assert!(ledger.record_usage(&record).await.is_err());
        assert!(ledger.record_usage(&record).await.is_ok());
        assert_eq!(ledger.calls(), 3);
        assert_eq!(ledger.records().await, vec![record]);
    }

    #[tokio::test]
    async fn test_broadcast_publisher_without_subscribers() {
        let publisher = BroadcastPublisher::new();
        let result = JobResult::success("req-1", "hi", None);
        assert!(publisher.publish("job-1", "req-1", &result).await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_publisher_delivers() {
        let publisher = BroadcastPublisher::new();
        let mut rx = publisher.subscribe();
        let result = JobResult::success("req-1", "hi", None);
        publisher.publish("job-1", "req-1", &result).await.unwrap();

        let published = rx.recv().await.unwrap();
        assert_eq!(published.job_id, "job-1");
        assert_eq!(published.result, result);
    }

    #[tokio::test]
    async fn test_memory_store_records_persona_and_channel() {
        let store = RecordingMemoryStore::new();
        let context = ConversationContext {
            channel_id: Some("chan-1".into()),
            ..Default::default()
        };
        store
            .store_deferred_memory(
                &Persona::new("p-1", "Ada"),
                &context,
                &serde_json::json!({"fact": "likes tea"}),
            )
            .await
            .unwrap();

        let entries = store.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].persona_id, "p-1");
        assert_eq!(entries[0].channel_id.as_deref(), Some("chan-1"));
    }
}
