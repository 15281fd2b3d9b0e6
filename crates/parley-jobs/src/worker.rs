//! Queue worker that feeds jobs to the router.
//!
//! Each job holds a concurrency slot from claim until acknowledgement; the
//! worker claims a new job as soon as a slot frees up and only polls on an
//! empty queue. Shutdown stops claiming and waits for jobs in flight.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use parley_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_MAX_CONCURRENT, JOB_POLL_INTERVAL_MS, JOB_TIMEOUT_SECS,
};
use parley_core::{Error, Job, JobResult, JobSource, Result};

use crate::router::JobRouter;

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle wait between polls of an empty queue.
    pub poll_interval_ms: u64,
    /// Jobs in flight at once.
    pub max_concurrent_jobs: usize,
    /// Router time budget per job.
    pub job_timeout_secs: u64,
    /// A disabled worker exits without claiming anything.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: JOB_MAX_CONCURRENT,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

/// Parse an environment variable, ignoring absent or malformed values.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

impl WorkerConfig {
    /// Read overrides from the environment.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | `false` or `0` disables the worker |
    /// | `JOB_MAX_CONCURRENT` | `4` | Jobs in flight at once |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Idle wait on an empty queue |
    /// | `JOB_TIMEOUT_SECS` | `300` | Router time budget per job |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("JOB_WORKER_ENABLED")
                .map(|v| !matches!(v.trim(), "false" | "0"))
                .unwrap_or(defaults.enabled),
            max_concurrent_jobs: env_parse::<usize>("JOB_MAX_CONCURRENT")
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),
            poll_interval_ms: env_parse("JOB_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll_interval_ms),
            job_timeout_secs: env_parse("JOB_TIMEOUT_SECS").unwrap_or(defaults.job_timeout_secs),
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Lifecycle notifications broadcast by a running worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted { job_id: String, job_type: String },
    /// The router returned a result; `success` is the result's own flag.
    JobCompleted {
        job_id: String,
        job_type: String,
        success: bool,
    },
    /// The router returned an error or the job ran out of time.
    JobFailed {
        job_id: String,
        job_type: String,
        error: String,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Control handle returned by [`JobWorker::start`].
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Ask the worker to stop. Jobs in flight finish first.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Worker already stopped".into()))
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Pulls jobs from a [`JobSource`] and routes them.
pub struct JobWorker {
    source: Arc<dyn JobSource>,
    router: Arc<JobRouter>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(source: Arc<dyn JobSource>, router: Arc<JobRouter>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            source,
            router,
            config,
            event_tx,
        }
    }

    /// Spawn the worker loop.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    #[instrument(skip_all)]
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker disabled");
            return;
        }

        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let idle = Duration::from_millis(self.config.poll_interval_ms);
        let mut in_flight = JoinSet::new();

        info!(
            max_concurrent = self.config.max_concurrent_jobs,
            poll_interval_ms = self.config.poll_interval_ms,
            job_timeout_secs = self.config.job_timeout_secs,
            "Job worker started"
        );
        self.emit(WorkerEvent::WorkerStarted);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }
                permit = Arc::clone(&slots).acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    match self.claim().await {
                        Some(job) => {
                            in_flight.spawn(self.task(permit).run(job));
                        }
                        None => {
                            drop(permit);
                            tokio::select! {
                                _ = shutdown_rx.recv() => break,
                                _ = sleep(idle) => {}
                            }
                        }
                    }
                }
            }
        }

        info!(in_flight = in_flight.len(), "Job worker draining");
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        self.emit(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    async fn claim(&self) -> Option<Job> {
        self.source.next_job().await.unwrap_or_else(|e| {
            error!(error = %e, "Failed to claim job");
            None
        })
    }

    fn task(&self, permit: OwnedSemaphorePermit) -> JobTask {
        JobTask {
            source: Arc::clone(&self.source),
            router: Arc::clone(&self.router),
            event_tx: self.event_tx.clone(),
            timeout: Duration::from_secs(self.config.job_timeout_secs),
            _permit: permit,
        }
    }

    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = ?e, "Job task panicked");
    }
}

/// One claimed job, owned by its spawned task. Dropping it frees the slot.
struct JobTask {
    source: Arc<dyn JobSource>,
    router: Arc<JobRouter>,
    event_tx: broadcast::Sender<WorkerEvent>,
    timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl JobTask {
    async fn run(self, job: Job) {
        let job_id = job.job_or_request_id().to_string();
        let job_type = job.job_type.clone();
        debug!(%job_id, %job_type, "Claimed job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id: job_id.clone(),
            job_type: job_type.clone(),
        });

        let started = Instant::now();
        let outcome = self.route(&job).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let event = match outcome {
            Ok(result) => self
                .acknowledge(&job, &result)
                .await
                .map(|()| WorkerEvent::JobCompleted {
                    job_id: job_id.clone(),
                    job_type: job_type.clone(),
                    success: result.success,
                }),
            Err(e) => {
                let message = e.to_string();
                self.reject(&job, &message)
                    .await
                    .map(|()| WorkerEvent::JobFailed {
                        job_id: job_id.clone(),
                        job_type: job_type.clone(),
                        error: message,
                    })
            }
        };

        match event {
            Ok(event) => {
                info!(%job_id, %job_type, duration_ms, "Job finished");
                let _ = self.event_tx.send(event);
            }
            Err(e) => error!(%job_id, error = %e, "Failed to acknowledge job with the queue"),
        }
    }

    /// Route the job under the time budget.
    async fn route(&self, job: &Job) -> Result<JobResult> {
        tokio::time::timeout(self.timeout, self.router.process_job(job))
            .await
            .unwrap_or_else(|_| {
                let secs = self.timeout.as_secs();
                warn!(job_id = job.job_or_request_id(), "Job exceeded timeout of {secs}s");
                Err(Error::Queue(format!("Job exceeded timeout of {secs}s")))
            })
    }

    async fn acknowledge(&self, job: &Job, result: &JobResult) -> Result<()> {
        self.source.complete(job, result).await
    }

    async fn reject(&self, job: &Job, message: &str) -> Result<()> {
        warn!(job_id = job.job_or_request_id(), error = message, "Job failed");
        self.source.fail(job, message).await
    }
}

/// Builder for a [`JobWorker`].
pub struct WorkerBuilder {
    source: Arc<dyn JobSource>,
    router: Arc<JobRouter>,
    config: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new(source: Arc<dyn JobSource>, router: Arc<JobRouter>) -> Self {
        Self {
            source,
            router,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> JobWorker {
        JobWorker::new(self.source, self.router, self.config)
    }
}
