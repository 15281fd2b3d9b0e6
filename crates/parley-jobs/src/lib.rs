//! # parley-jobs
//!
//! Job execution core of the parley worker.
//!
//! This crate provides:
//! - The job router: idempotency, dispatch and best-effort side effects
//! - The generation pipeline and its bounded retry ladder
//! - In-memory collaborators for tests and local runs
//! - A concurrent queue worker with graceful shutdown
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use parley_jobs::{
//!     AuthStep, GenerationOrchestrator, InMemoryJobQueue, JobRouter, LlmGenerationHandler,
//!     WorkerBuilder, WorkerConfig,
//! };
//!
//! let orchestrator = GenerationOrchestrator::new(backend);
//! let router = JobRouter::builder()
//!     .with_handler(LlmGenerationHandler::with_default_steps(
//!         orchestrator,
//!         AuthStep::guest("openrouter"),
//!     ))
//!     .with_lock(lock)
//!     .with_delivery_store(delivery)
//!     .with_publisher(publisher)
//!     .with_usage_ledger(usage)
//!     .build()?;
//!
//! let queue = Arc::new(InMemoryJobQueue::new());
//! let handle = WorkerBuilder::new(queue, Arc::new(router))
//!     .with_config(WorkerConfig::from_env())
//!     .build()
//!     .start();
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod generation;
pub mod handler;
pub mod in_memory;
pub mod ladder;
pub mod pipeline;
pub mod router;
pub mod worker;

// Re-export core types
pub use parley_core::*;

pub use generation::{GenerationOrchestrator, EMPTY_RESPONSE_ERROR};
pub use handler::{JobHandler, NoOpHandler};
pub use in_memory::{
    BroadcastPublisher, InMemoryIdempotencyLock, InMemoryJobQueue, InMemoryResultCache,
    PublishedResult, RecordingDeliveryStore, RecordingMemoryStore, RecordingUsageLedger,
    StoredMemory,
};
pub use ladder::{run_ladder, LadderOutcome};
pub use pipeline::{
    AuthStep, ConfigStep, ContextStep, LlmGenerationHandler, PipelineContext, PipelineStep,
};
pub use router::{JobRouter, JobRouterBuilder, RouterConfig};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
