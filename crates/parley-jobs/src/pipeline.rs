//! Generation pipeline.
//!
//! An LLM generation job runs a fixed sequence of steps over a shared
//! [`PipelineContext`]: resolve the effective persona config, resolve auth,
//! prepare the conversation context, then generate. Each resolution step
//! fills in one artifact; the generation step refuses to run while any is
//! missing.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument};

use parley_core::{
    ConfigSource, ConversationContext, Job, JobResult, JobType, ResolvedAuth, ResolvedConfig,
    Result,
};

use crate::generation::GenerationOrchestrator;
use crate::handler::JobHandler;

/// Name of the step that resolves the effective persona config.
pub const CONFIG_STEP: &str = "ConfigStep";
/// Name of the step that resolves credentials.
pub const AUTH_STEP: &str = "AuthStep";
/// Name of the step that prepares the conversation context.
pub const CONTEXT_STEP: &str = "ContextStep";

/// State threaded through the pipeline steps of one job.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub job: Job,
    pub started_at: Instant,
    pub config: Option<ResolvedConfig>,
    pub auth: Option<ResolvedAuth>,
    pub conversation: Option<ConversationContext>,
}

impl PipelineContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            started_at: Instant::now(),
            config: None,
            auth: None,
            conversation: None,
        }
    }
}

/// One stage of the generation pipeline.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &mut PipelineContext) -> Result<()>;
}

/// Uses the persona shipped in the job payload as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigStep;

#[async_trait]
impl PipelineStep for ConfigStep {
    fn name(&self) -> &'static str {
        CONFIG_STEP
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<()> {
        ctx.config = Some(ResolvedConfig {
            persona: ctx.job.payload.personality.clone(),
            source: ConfigSource::Personality,
        });
        Ok(())
    }
}

/// Resolves credentials for a provider. Without an API key the request runs
/// in guest mode.
#[derive(Clone)]
pub struct AuthStep {
    provider: String,
    api_key: Option<String>,
}

impl AuthStep {
    pub fn new(provider: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            provider: provider.into(),
            api_key,
        }
    }

    pub fn guest(provider: impl Into<String>) -> Self {
        Self::new(provider, None)
    }
}

#[async_trait]
impl PipelineStep for AuthStep {
    fn name(&self) -> &'static str {
        AUTH_STEP
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<()> {
        ctx.auth = Some(ResolvedAuth {
            provider: self.provider.clone(),
            api_key: self.api_key.clone(),
            is_guest_mode: self.api_key.is_none(),
        });
        Ok(())
    }
}

/// Builds the conversation context from the request payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextStep;

#[async_trait]
impl PipelineStep for ContextStep {
    fn name(&self) -> &'static str {
        CONTEXT_STEP
    }

    async fn process(&self, ctx: &mut PipelineContext) -> Result<()> {
        let payload = &ctx.job.payload;
        ctx.conversation = Some(ConversationContext::from_request(
            &payload.context,
            &payload.attachments,
        ));
        Ok(())
    }
}

/// Handler for LLM generation jobs: runs the resolution steps in order, then
/// the generation orchestrator.
pub struct LlmGenerationHandler {
    steps: Vec<Arc<dyn PipelineStep>>,
    orchestrator: GenerationOrchestrator,
}

impl LlmGenerationHandler {
    /// Handler with an explicit step list.
    pub fn new(orchestrator: GenerationOrchestrator, steps: Vec<Arc<dyn PipelineStep>>) -> Self {
        Self {
            steps,
            orchestrator,
        }
    }

    /// Handler with the standard config, auth and context steps.
    pub fn with_default_steps(orchestrator: GenerationOrchestrator, auth: AuthStep) -> Self {
        Self::new(
            orchestrator,
            vec![Arc::new(ConfigStep), Arc::new(auth), Arc::new(ContextStep)],
        )
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl JobHandler for LlmGenerationHandler {
    fn job_type(&self) -> JobType {
        JobType::LlmGeneration
    }

    #[instrument(skip_all, fields(request_id = %job.request_id()))]
    async fn execute(&self, job: &Job) -> Result<JobResult> {
        let mut ctx = PipelineContext::new(job.clone());
        for step in &self.steps {
            debug!(step = step.name(), "Running pipeline step");
            step.process(&mut ctx).await?;
        }
        self.orchestrator.run(&ctx).await
    }
}
