//! Integration tests for JobRouter.
//!
//! Covers:
//! - Type dispatch and unknown type rejection
//! - Idempotency lock acquire/release rules
//! - Result caching and delivery side effects
//! - Usage ledger retries
//! - Isolation of side-effect failures from the job outcome

use std::sync::Arc;

use async_trait::async_trait;
use parley_inference::mock::MockGenerationBackend;
use parley_jobs::{
    AuthStep, BroadcastPublisher, DestinationKind, Error, GenerationOrchestrator,
    IdempotencyLock, InMemoryIdempotencyLock, InMemoryResultCache, Job, JobHandler, JobPayload,
    JobResult, JobRouter, JobType, LlmGenerationHandler, NoOpHandler, Persona,
    RecordingDeliveryStore, RecordingUsageLedger, RequestContext, ResponseDestination,
    Result, ResultCache, RouterConfig, DUPLICATE_MESSAGE_ERROR,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn payload(request_id: &str) -> JobPayload {
    JobPayload {
        request_id: request_id.to_string(),
        message: Some("hello there".to_string()),
        attachments: Vec::new(),
        personality: Persona::new("p-1", "Ada"),
        context: RequestContext {
            user_id: Some("u-1".to_string()),
            channel_id: "chan-1".to_string(),
            ..Default::default()
        },
        response_destination: ResponseDestination {
            kind: DestinationKind::Discord,
            channel_id: Some("chan-1".to_string()),
            callback_url: None,
        },
    }
}

fn llm_job() -> Job {
    Job::new(JobType::LlmGeneration, payload("req-1")).with_id("job-1")
}

fn triggered_job(trigger: &str) -> Job {
    let mut job = llm_job();
    job.payload.context.trigger_message_id = Some(trigger.to_string());
    job
}

/// Handler whose execution always fails.
struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    fn job_type(&self) -> JobType {
        JobType::LlmGeneration
    }

    async fn execute(&self, _job: &Job) -> Result<JobResult> {
        Err(Error::Inference("backend unreachable".into()))
    }
}

struct Harness {
    router: JobRouter,
    backend: Arc<MockGenerationBackend>,
    lock: Arc<InMemoryIdempotencyLock>,
    cache: Arc<InMemoryResultCache>,
    delivery: Arc<RecordingDeliveryStore>,
    publisher: Arc<BroadcastPublisher>,
    usage: Arc<RecordingUsageLedger>,
}

struct HarnessBuilder {
    backend: MockGenerationBackend,
    cache: InMemoryResultCache,
    delivery: RecordingDeliveryStore,
    publisher: BroadcastPublisher,
    usage: RecordingUsageLedger,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            backend: MockGenerationBackend::new(),
            cache: InMemoryResultCache::new(),
            delivery: RecordingDeliveryStore::new(),
            publisher: BroadcastPublisher::new(),
            usage: RecordingUsageLedger::new(),
        }
    }

    fn build(self) -> Harness {
        let backend = Arc::new(self.backend);
        let lock = Arc::new(InMemoryIdempotencyLock::new());
        let cache = Arc::new(self.cache);
        let delivery = Arc::new(self.delivery);
        let publisher = Arc::new(self.publisher);
        let usage = Arc::new(self.usage);

        let router = JobRouter::builder()
            .with_handler(LlmGenerationHandler::with_default_steps(
                GenerationOrchestrator::new(backend.clone()),
                AuthStep::guest("openrouter"),
            ))
            .with_handler(NoOpHandler::new(JobType::AudioTranscription))
            .with_lock(lock.clone())
            .with_cache(cache.clone())
            .with_delivery_store(delivery.clone())
            .with_publisher(publisher.clone())
            .with_usage_ledger(usage.clone())
            .with_config(RouterConfig::default().with_usage_log_retry_delay_ms(0))
            .build()
            .unwrap();

        Harness {
            router,
            backend,
            lock,
            cache,
            delivery,
            publisher,
            usage,
        }
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

#[tokio::test]
async fn test_unknown_job_type_rejected_with_type_name() {
    let h = HarnessBuilder::new().build();
    let mut job = llm_job();
    job.job_type = "video-render".to_string();

    let err = h.router.process_job(&job).await.unwrap_err();
    assert!(matches!(err, Error::UnknownJobType(_)));
    assert!(err.to_string().contains("video-render"));
    assert_eq!(h.backend.generate_call_count(), 0);
}

#[tokio::test]
async fn test_known_type_without_handler_rejected() {
    let h = HarnessBuilder::new().build();
    let job = Job::new(JobType::ImageDescription, payload("req-2"));

    let err = h.router.process_job(&job).await.unwrap_err();
    assert!(matches!(err, Error::NoHandler(JobType::ImageDescription)));
}

#[tokio::test]
async fn test_llm_job_dispatched_to_generation() {
    let h = HarnessBuilder::new().build();
    let result = h.router.process_job(&llm_job()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.content.as_deref(), Some("Mock response"));
    assert_eq!(h.backend.generate_call_count(), 1);
}

// ============================================================================
// IDEMPOTENCY
// ============================================================================

#[tokio::test]
async fn test_duplicate_trigger_short_circuits() {
    let h = HarnessBuilder::new().build();
    assert!(h.lock.acquire("msg-1").await.unwrap());

    let result = h.router.process_job(&triggered_job("msg-1")).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some(DUPLICATE_MESSAGE_ERROR));
    assert_eq!(h.backend.generate_call_count(), 0);
    // Not released: the other holder still owns it.
    assert!(h.lock.is_held("msg-1").await);
    assert!(h.delivery.records().await.is_empty());
}

#[tokio::test]
async fn test_success_keeps_lock() {
    let h = HarnessBuilder::new().build();
    let result = h.router.process_job(&triggered_job("msg-2")).await.unwrap();

    assert!(result.success);
    assert!(h.lock.is_held("msg-2").await);

    // A redelivery of the same trigger is now a duplicate.
    let again = h.router.process_job(&triggered_job("msg-2")).await.unwrap();
    assert_eq!(again.error.as_deref(), Some(DUPLICATE_MESSAGE_ERROR));
    assert_eq!(h.backend.generate_call_count(), 1);
}

#[tokio::test]
async fn test_handler_error_releases_lock_and_propagates() {
    let lock = Arc::new(InMemoryIdempotencyLock::new());
    let router = JobRouter::builder()
        .with_handler(FailingHandler)
        .with_lock(lock.clone())
        .with_in_memory_collaborators()
        .build()
        .unwrap();

    let err = router
        .process_job(&triggered_job("msg-3"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Inference(_)));
    assert!(!lock.is_held("msg-3").await);
}

#[tokio::test]
async fn test_job_without_trigger_skips_lock() {
    let h = HarnessBuilder::new().build();
    h.router.process_job(&llm_job()).await.unwrap();
    h.router.process_job(&llm_job()).await.unwrap();
    assert_eq!(h.backend.generate_call_count(), 2);
}

// ============================================================================
// SIDE EFFECTS
// ============================================================================

#[tokio::test]
async fn test_result_cached_under_user_and_job_id() {
    let h = HarnessBuilder::new().build();
    h.router.process_job(&llm_job()).await.unwrap();

    let cached = h.cache.get("u-1:job-1").await.unwrap().unwrap();
    assert_eq!(cached.content.as_deref(), Some("Mock response"));
}

#[tokio::test]
async fn test_cache_key_falls_back_to_unknown_user_and_request_id() {
    let h = HarnessBuilder::new().build();
    let mut job = Job::new(JobType::LlmGeneration, payload("req-9"));
    job.payload.context.user_id = None;

    h.router.process_job(&job).await.unwrap();
    assert!(h.cache.get("unknown:req-9").await.unwrap().is_some());
}

#[tokio::test]
async fn test_generation_job_persisted_and_published() {
    let h = HarnessBuilder::new().build();
    let mut rx = h.publisher.subscribe();

    h.router.process_job(&llm_job()).await.unwrap();

    let records = h.delivery.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, "job-1");
    assert_eq!(records[0].request_id, "req-1");

    let published = rx.recv().await.unwrap();
    assert_eq!(published.job_id, "job-1");
    assert!(published.result.success);
}

#[tokio::test]
async fn test_preprocessing_job_skips_delivery_tracking() {
    let h = HarnessBuilder::new().build();
    let job = Job::new(JobType::AudioTranscription, payload("req-3"));

    let result = h.router.process_job(&job).await.unwrap();

    assert!(result.success);
    assert_eq!(h.delivery.calls(), 0);
    assert_eq!(h.publisher.calls(), 0);
    // Still cached for the synchronous waiter.
    assert!(h.cache.get("u-1:req-3").await.unwrap().is_some());
}

#[tokio::test]
async fn test_persist_and_publish_failures_do_not_change_outcome() {
    let mut builder = HarnessBuilder::new();
    builder.delivery = RecordingDeliveryStore::failing(1);
    builder.publisher = BroadcastPublisher::failing(1);
    let h = builder.build();

    let result = h.router.process_job(&llm_job()).await.unwrap();

    assert!(result.success);
    assert_eq!(h.delivery.calls(), 1);
    assert_eq!(h.publisher.calls(), 1);
    assert!(h.delivery.records().await.is_empty());
}

#[tokio::test]
async fn test_cleanup_failure_is_swallowed_and_runs_every_job() {
    let mut builder = HarnessBuilder::new();
    builder.cache = InMemoryResultCache::new().failing_cleanup(1);
    let h = builder.build();

    assert!(h.router.process_job(&llm_job()).await.unwrap().success);

    let mut unknown = llm_job();
    unknown.job_type = "nope".to_string();
    assert!(h.router.process_job(&unknown).await.is_err());

    assert_eq!(h.cache.cleanup_calls(), 2);
}

// ============================================================================
// USAGE LOGGING
// ============================================================================

fn job_with_internal_user() -> Job {
    let mut job = llm_job();
    job.payload.context.user_internal_id = Some("internal-7".to_string());
    job
}

#[tokio::test]
async fn test_usage_recorded_for_internal_user() {
    let h = HarnessBuilder::new().build();
    h.router.process_job(&job_with_internal_user()).await.unwrap();

    let records = h.usage.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].user_id, "internal-7");
    assert_eq!(records[0].request_type, "llm_generation");
}

#[tokio::test]
async fn test_usage_not_recorded_without_internal_user() {
    let h = HarnessBuilder::new().build();
    h.router.process_job(&llm_job()).await.unwrap();
    assert_eq!(h.usage.calls(), 0);
}

#[tokio::test]
async fn test_usage_retried_until_success() {
    let mut builder = HarnessBuilder::new();
    builder.usage = RecordingUsageLedger::failing(2);
    let h = builder.build();

    let result = h.router.process_job(&job_with_internal_user()).await.unwrap();

    assert!(result.success);
    assert_eq!(h.usage.calls(), 3);
    assert_eq!(h.usage.records().await.len(), 1);
}

#[tokio::test]
async fn test_usage_exhaustion_still_succeeds() {
    let mut builder = HarnessBuilder::new();
    builder.usage = RecordingUsageLedger::failing(10);
    let h = builder.build();

    let result = h.router.process_job(&job_with_internal_user()).await.unwrap();

    assert!(result.success);
    assert_eq!(h.usage.calls(), 3);
    assert!(h.usage.records().await.is_empty());
}

#[tokio::test]
async fn test_failed_generation_skips_usage() {
    let mut builder = HarnessBuilder::new();
    builder.backend = MockGenerationBackend::new().with_reply("");
    let h = builder.build();

    let result = h.router.process_job(&job_with_internal_user()).await.unwrap();

    assert!(!result.success);
    assert_eq!(h.usage.calls(), 0);
    // Failed results are still delivered.
    assert_eq!(h.delivery.records().await.len(), 1);
}
