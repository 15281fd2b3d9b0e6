//! Job router.
//!
//! Entry point for every job pulled off the queue. The router:
//!
//! 1. Rejects unknown job types.
//! 2. Claims the idempotency lock for jobs tied to a trigger message, and
//!    answers a soft "duplicate message" failure when another worker already
//!    holds it.
//! 3. Dispatches to the handler registered for the type.
//! 4. Runs the side effects of a finished job (result cache, durable
//!    delivery record, result stream, usage ledger). None of these can change
//!    the job's outcome once the handler has produced it.
//!
//! A handler error releases the lock so a redelivery can retry the job.
//! A successful job keeps the lock; how long it lives is up to the lock
//! service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, error, field, info, instrument, warn, Span};

use parley_core::defaults::{
    USAGE_LOG_MAX_ATTEMPTS, USAGE_LOG_RETRY_DELAY_MS, USAGE_REQUEST_TYPE,
};
use parley_core::logging;
use parley_core::{
    DeliveryRecord, DeliveryStore, Error, IdempotencyLock, Job, JobResult, JobType,
    ResultCache, ResultPublisher, Result, UsageLedger, UsageRecord,
};

use crate::handler::JobHandler;
use crate::in_memory::{
    BroadcastPublisher, InMemoryIdempotencyLock, InMemoryResultCache, RecordingDeliveryStore,
    RecordingUsageLedger,
};

/// Placeholder for usage fields the backend did not report.
const UNKNOWN_USAGE_FIELD: &str = "unknown";

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Attempts for recording usage before giving up.
    pub usage_log_max_attempts: u32,
    /// Delay between usage recording attempts.
    pub usage_log_retry_delay_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            usage_log_max_attempts: USAGE_LOG_MAX_ATTEMPTS,
            usage_log_retry_delay_ms: USAGE_LOG_RETRY_DELAY_MS,
        }
    }
}

impl RouterConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `USAGE_LOG_MAX_ATTEMPTS` | `3` | Usage ledger attempts per job |
    /// | `USAGE_LOG_RETRY_DELAY_MS` | `100` | Delay between usage ledger attempts |
    pub fn from_env() -> Self {
        let usage_log_max_attempts = std::env::var("USAGE_LOG_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(USAGE_LOG_MAX_ATTEMPTS)
            .max(1);

        let usage_log_retry_delay_ms = std::env::var("USAGE_LOG_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(USAGE_LOG_RETRY_DELAY_MS);

        Self {
            usage_log_max_attempts,
            usage_log_retry_delay_ms,
        }
    }

    pub fn with_usage_log_max_attempts(mut self, attempts: u32) -> Self {
        self.usage_log_max_attempts = attempts;
        self
    }

    pub fn with_usage_log_retry_delay_ms(mut self, ms: u64) -> Self {
        self.usage_log_retry_delay_ms = ms;
        self
    }
}

/// Dispatches jobs to handlers and runs their side effects.
pub struct JobRouter {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    lock: Arc<dyn IdempotencyLock>,
    cache: Arc<dyn ResultCache>,
    delivery: Arc<dyn DeliveryStore>,
    publisher: Arc<dyn ResultPublisher>,
    usage: Arc<dyn UsageLedger>,
    config: RouterConfig,
}

impl JobRouter {
    pub fn builder() -> JobRouterBuilder {
        JobRouterBuilder::new()
    }

    /// Job types with a registered handler.
    pub fn job_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }

    /// Process one job.
    ///
    /// Fails for an unknown or unhandled job type, when the lock service is
    /// unreachable, and when the handler itself fails. Everything after the
    /// handler is best-effort.
    #[instrument(
        skip_all,
        fields(
            job_id = %job.job_or_request_id(),
            job_type = %job.job_type,
            success = field::Empty,
            duration_ms = field::Empty,
        )
    )]
    pub async fn process_job(&self, job: &Job) -> Result<JobResult> {
        let started = Instant::now();
        let outcome = self.dispatch(job).await;

        let span = Span::current();
        if let Ok(result) = &outcome {
            span.record(logging::SUCCESS, result.success);
        }
        span.record(logging::DURATION_MS, started.elapsed().as_millis() as u64);

        if let Err(e) = self.cache.cleanup_expired().await {
            debug!(error = %e, "Result cache cleanup failed");
        }

        outcome
    }

    async fn dispatch(&self, job: &Job) -> Result<JobResult> {
        let job_type = job.kind()?;
        let handler = self
            .handlers
            .get(&job_type)
            .cloned()
            .ok_or(Error::NoHandler(job_type))?;

        let lock_key = job.payload.context.trigger_message_id.as_deref();
        if let Some(key) = lock_key {
            if !self.lock.acquire(key).await? {
                info!(trigger_message_id = key, "Trigger message already processed, skipping");
                return Ok(JobResult::duplicate_message(job.request_id()));
            }
        }

        let result = match handler.execute(job).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Job handler failed");
                if let Some(key) = lock_key {
                    if let Err(release_err) = self.lock.release(key).await {
                        warn!(error = %release_err, trigger_message_id = key, "Failed to release idempotency lock");
                    }
                }
                return Err(e);
            }
        };

        info!(success = result.success, "Job processed");
        self.after_success(job, job_type, &result).await;
        Ok(result)
    }

    async fn after_success(&self, job: &Job, job_type: JobType, result: &JobResult) {
        if let Err(e) = self.cache.store(&job.cache_key(), result).await {
            warn!(error = %e, "Failed to cache job result");
        }

        // Preprocessing jobs are awaited synchronously by their callers.
        if job_type.requires_delivery_tracking() {
            let (persisted, published) = futures::join!(
                self.persist(job, result),
                self.publish(job, result)
            );
            debug!(persisted, published, "Delivery side effects finished");
        }

        if let Some(user_id) = job.payload.context.user_internal_id.as_deref() {
            if let Some(record) = usage_record(user_id, result) {
                self.record_usage(&record).await;
            }
        }
    }

    async fn persist(&self, job: &Job, result: &JobResult) -> bool {
        match self
            .delivery
            .persist(&DeliveryRecord::pending(job, result))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to persist delivery record");
                false
            }
        }
    }

    async fn publish(&self, job: &Job, result: &JobResult) -> bool {
        match self
            .publisher
            .publish(job.job_or_request_id(), job.request_id(), result)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to publish job result");
                false
            }
        }
    }

    async fn record_usage(&self, record: &UsageRecord) {
        let max_attempts = self.config.usage_log_max_attempts.max(1);
        let delay = Duration::from_millis(self.config.usage_log_retry_delay_ms);

        for attempt in 1..=max_attempts {
            match self.usage.record_usage(record).await {
                Ok(()) => {
                    debug!(attempt, "Recorded usage");
                    return;
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Failed to record usage");
                    if attempt < max_attempts {
                        sleep(delay).await;
                    }
                }
            }
        }

        error!(
            user_id = %record.user_id,
            tokens_in = record.tokens_in,
            tokens_out = record.tokens_out,
            "Usage logging exhausted retries, usage not recorded"
        );
    }
}

/// Usage entry for a successful generation, if the result carries metadata.
fn usage_record(user_id: &str, result: &JobResult) -> Option<UsageRecord> {
    if !result.success {
        return None;
    }
    let metadata = result.metadata.as_ref()?;
    Some(UsageRecord {
        user_id: user_id.to_string(),
        provider: metadata
            .provider_used
            .clone()
            .unwrap_or_else(|| UNKNOWN_USAGE_FIELD.to_string()),
        model: metadata
            .model_used
            .clone()
            .unwrap_or_else(|| UNKNOWN_USAGE_FIELD.to_string()),
        tokens_in: metadata.tokens_in.unwrap_or(0),
        tokens_out: metadata.tokens_out.unwrap_or(0),
        request_type: USAGE_REQUEST_TYPE.to_string(),
    })
}

/// Builder for a [`JobRouter`].
///
/// The idempotency lock, delivery store, publisher and usage ledger must be
/// set, or `build` fails with [`Error::Config`]. The result cache defaults
/// to [`InMemoryResultCache`], which the router sweeps after every job.
/// [`with_in_memory_collaborators`](Self::with_in_memory_collaborators)
/// fills every unset slot with the in-memory implementations instead; those
/// are process-local and only meant for tests and single-process runs.
pub struct JobRouterBuilder {
    handlers: Vec<Arc<dyn JobHandler>>,
    in_memory_fallback: bool,
    lock: Option<Arc<dyn IdempotencyLock>>,
    cache: Option<Arc<dyn ResultCache>>,
    delivery: Option<Arc<dyn DeliveryStore>>,
    publisher: Option<Arc<dyn ResultPublisher>>,
    usage: Option<Arc<dyn UsageLedger>>,
    config: RouterConfig,
}

impl JobRouterBuilder {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            in_memory_fallback: false,
            lock: None,
            cache: None,
            delivery: None,
            publisher: None,
            usage: None,
            config: RouterConfig::default(),
        }
    }

    /// Add a handler. A later handler for the same type replaces an earlier one.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn with_lock(mut self, lock: Arc<dyn IdempotencyLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_delivery_store(mut self, delivery: Arc<dyn DeliveryStore>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ResultPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_usage_ledger(mut self, usage: Arc<dyn UsageLedger>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use the in-memory collaborators for every slot left unset at build time.
    pub fn with_in_memory_collaborators(mut self) -> Self {
        self.in_memory_fallback = true;
        self
    }

    pub fn build(self) -> Result<JobRouter> {
        let fallback = self.in_memory_fallback;

        let lock = require(self.lock, "idempotency lock", fallback, || {
            Arc::new(InMemoryIdempotencyLock::new()) as Arc<dyn IdempotencyLock>
        })?;
        let delivery = require(self.delivery, "delivery store", fallback, || {
            Arc::new(RecordingDeliveryStore::new()) as Arc<dyn DeliveryStore>
        })?;
        let publisher = require(self.publisher, "result publisher", fallback, || {
            Arc::new(BroadcastPublisher::new()) as Arc<dyn ResultPublisher>
        })?;
        let usage = require(self.usage, "usage ledger", fallback, || {
            Arc::new(RecordingUsageLedger::new()) as Arc<dyn UsageLedger>
        })?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryResultCache::new()));

        let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
        for handler in self.handlers {
            let job_type = handler.job_type();
            debug!(%job_type, "Registered job handler");
            handlers.insert(job_type, handler);
        }

        Ok(JobRouter {
            handlers,
            lock,
            cache,
            delivery,
            publisher,
            usage,
            config: self.config,
        })
    }
}

fn require<T: ?Sized>(
    slot: Option<Arc<T>>,
    name: &str,
    fallback: bool,
    in_memory: impl FnOnce() -> Arc<T>,
) -> Result<Arc<T>> {
    match slot {
        Some(collaborator) => Ok(collaborator),
        None if fallback => Ok(in_memory()),
        None => Err(Error::Config(format!("JobRouter requires a {name}"))),
    }
}

impl Default for JobRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
