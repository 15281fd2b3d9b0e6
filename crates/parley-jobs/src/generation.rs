//! Generation orchestrator.
//!
//! Runs the bounded retry ladder for one LLM generation job. A response that
//! repeats one of the recent assistant turns is regenerated with perturbed
//! sampling parameters (see [`build_retry_config`]); provider failures are
//! never retried here, they are classified and returned as a failed result.
//!
//! Every attempt works on its own clone of the prepared conversation
//! context, so whatever the backend does to the context it receives cannot
//! leak into the next attempt.

use std::sync::Arc;

use tracing::{debug, field, info, instrument, warn, Span};

use parley_core::defaults::{MAX_GENERATION_ATTEMPTS, THINKING_BLOCK_SEPARATOR};
use parley_core::logging;
use parley_core::{
    ConversationContext, Error, ErrorCategory, ErrorInfo, GenerationAttempt, GenerationBackend,
    GenerationFailure, GenerationOverrides, JobResult, MemoryStore, Persona, ResolvedAuth,
    ResolvedConfig, Result, ResultMetadata,
};
use parley_inference::{build_retry_config, classify_failure, extract_thinking_blocks};
use parley_similarity::{remove_duplicate_response, DuplicateDetector};

use crate::ladder::{run_ladder, LadderOutcome};
use crate::pipeline::{PipelineContext, AUTH_STEP, CONFIG_STEP, CONTEXT_STEP};

/// User-visible error for a response with no visible text.
pub const EMPTY_RESPONSE_ERROR: &str = "Model returned an empty response";

/// Why an attempt ended the ladder without a usable response.
#[derive(Debug)]
enum AttemptFailure {
    Generation(GenerationFailure),
    EmptyResponse { thinking_content: Option<String> },
}

/// Borrowed inputs shared by every attempt of one job.
struct AttemptInputs<'a> {
    persona: &'a Persona,
    message: &'a str,
    context: &'a ConversationContext,
    auth: &'a ResolvedAuth,
    recent: Vec<&'a str>,
}

/// Runs the attempt ladder and assembles the job result.
pub struct GenerationOrchestrator {
    backend: Arc<dyn GenerationBackend>,
    detector: DuplicateDetector,
    memory: Option<Arc<dyn MemoryStore>>,
    max_attempts: u32,
}

impl GenerationOrchestrator {
    /// Orchestrator with the footer-aware duplicate detector and no memory
    /// store.
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            detector: DuplicateDetector::default(),
            memory: None,
            max_attempts: MAX_GENERATION_ATTEMPTS,
        }
    }

    pub fn with_detector(mut self, detector: DuplicateDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_memory_store(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Generate a response for a prepared pipeline context.
    ///
    /// Only fails when a resolution step has not run; every generation
    /// outcome, good or bad, comes back as a [`JobResult`].
    #[instrument(
        skip_all,
        fields(
            request_id = %ctx.job.request_id(),
            attempt = field::Empty,
            model = field::Empty,
            provider = field::Empty,
        )
    )]
    pub async fn run(&self, ctx: &PipelineContext) -> Result<JobResult> {
        let config = ctx.config.as_ref().ok_or(Error::PipelineOrder {
            step: CONFIG_STEP,
            artifact: "effective config",
        })?;
        let auth = ctx.auth.as_ref().ok_or(Error::PipelineOrder {
            step: AUTH_STEP,
            artifact: "resolved auth",
        })?;
        let conversation = ctx.conversation.as_ref().ok_or(Error::PipelineOrder {
            step: CONTEXT_STEP,
            artifact: "conversation context",
        })?;

        let inputs = AttemptInputs {
            persona: &config.persona,
            message: ctx.job.payload.message.as_deref().unwrap_or_default(),
            context: conversation,
            auth,
            recent: conversation.recent_assistant_messages(self.detector.lookback()),
        };
        let inputs = &inputs;

        let outcome = run_ladder(
            self.max_attempts,
            build_retry_config,
            move |attempt, overrides| self.run_attempt(attempt, overrides, inputs),
            |attempt: &GenerationAttempt| !attempt.is_duplicate(),
        )
        .await;

        let span = Span::current();
        span.record(logging::ATTEMPT, outcome.attempts);

        let result = self.assemble(ctx, config, auth, conversation, outcome).await;
        if let Some(meta) = &result.metadata {
            if let Some(model) = meta.model_used.as_deref() {
                span.record(logging::MODEL, model);
            }
            if let Some(provider) = meta.provider_used.as_deref() {
                span.record(logging::PROVIDER, provider);
            }
        }
        Ok(result)
    }

    async fn run_attempt(
        &self,
        attempt: u32,
        overrides: GenerationOverrides,
        inputs: &AttemptInputs<'_>,
    ) -> std::result::Result<GenerationAttempt, AttemptFailure> {
        let mut context = inputs.context.clone();
        if let Some(fraction) = overrides.history_reduction {
            let dropped = context.drop_oldest_history(fraction);
            debug!(attempt, dropped, "Reduced conversation history for retry");
        }
        if attempt > 1 {
            info!(
                attempt,
                temperature = ?overrides.temperature,
                frequency_penalty = ?overrides.frequency_penalty,
                "Regenerating after duplicate response"
            );
        }

        let output = self
            .backend
            .generate(
                inputs.persona,
                inputs.message,
                &mut context,
                &overrides,
                inputs.auth,
            )
            .await
            .map_err(AttemptFailure::Generation)?;

        let extraction = extract_thinking_blocks(&output.content);
        let thinking_content =
            merge_thinking(output.thinking_content.clone(), extraction.thinking_content);

        if extraction.visible_content.trim().is_empty() {
            return Err(AttemptFailure::EmptyResponse { thinking_content });
        }

        let verdict = self
            .detector
            .is_recent_duplicate(&extraction.visible_content, &inputs.recent);
        if verdict.is_duplicate {
            warn!(
                attempt,
                similarity = verdict.similarity,
                turns_back = verdict.match_index,
                "Response repeats a recent assistant turn"
            );
        }

        Ok(GenerationAttempt {
            attempt,
            overrides,
            output,
            visible_content: extraction.visible_content,
            thinking_content,
            duplicate: Some(verdict),
        })
    }

    async fn assemble(
        &self,
        ctx: &PipelineContext,
        config: &ResolvedConfig,
        auth: &ResolvedAuth,
        conversation: &ConversationContext,
        outcome: LadderOutcome<GenerationAttempt, AttemptFailure>,
    ) -> JobResult {
        let request_id = ctx.job.request_id();
        let any_duplicate = outcome.values().any(GenerationAttempt::is_duplicate);
        // Most recent non-empty thinking wins over an empty final attempt.
        let chain_thinking = outcome.values().rev().find_map(|a| {
            a.thinking_content
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(str::to_string)
        });

        let mut metadata = ResultMetadata {
            config_source: Some(config.source),
            is_guest_mode: auth.is_guest_mode,
            cross_turn_duplicate_detected: any_duplicate,
            ..Default::default()
        };

        match outcome.last {
            Ok(best) => {
                if best.is_duplicate() {
                    warn!(
                        attempts = outcome.attempts,
                        "Retry ladder exhausted, delivering last attempt"
                    );
                }

                let content = remove_duplicate_response(&best.visible_content).to_string();
                let output = &best.output;
                metadata.tokens_in = output.tokens_in;
                metadata.tokens_out = output.tokens_out;
                metadata.model_used = output.model_used.clone();
                metadata.provider_used = output.provider_used.clone();
                metadata.thinking_content = chain_thinking;

                self.store_deferred_memory(&config.persona, conversation, &best)
                    .await;

                metadata.processing_time_ms = elapsed_ms(ctx);
                info!(
                    attempts = outcome.attempts,
                    response_len = content.len(),
                    duration_ms = metadata.processing_time_ms,
                    cross_turn_duplicate = any_duplicate,
                    "Generation succeeded"
                );
                JobResult::success(request_id, content, Some(metadata))
            }
            Err(AttemptFailure::Generation(failure)) => {
                let info = classify_failure(&failure);
                warn!(
                    attempt = outcome.attempts,
                    error_category = %info.category,
                    error = %failure,
                    "Generation failed"
                );
                metadata.thinking_content = chain_thinking;
                metadata.error_info = Some(info);
                metadata.processing_time_ms = elapsed_ms(ctx);
                JobResult::failure(request_id, failure.to_string(), Some(metadata))
            }
            Err(AttemptFailure::EmptyResponse { thinking_content }) => {
                warn!(
                    attempt = outcome.attempts,
                    has_thinking = thinking_content.is_some(),
                    "Model returned no visible content"
                );
                metadata.thinking_content = thinking_content.or(chain_thinking);
                metadata.error_info = Some(ErrorInfo::new(ErrorCategory::EmptyResponse));
                metadata.processing_time_ms = elapsed_ms(ctx);
                JobResult::failure(request_id, EMPTY_RESPONSE_ERROR, Some(metadata))
            }
        }
    }

    async fn store_deferred_memory(
        &self,
        persona: &Persona,
        conversation: &ConversationContext,
        best: &GenerationAttempt,
    ) {
        let Some(data) = &best.output.deferred_memory_data else {
            return;
        };
        if best.output.incognito_mode_active {
            debug!("Incognito mode active, not storing deferred memory");
            return;
        }
        let Some(memory) = &self.memory else {
            return;
        };
        if let Err(e) = memory.store_deferred_memory(persona, conversation, data).await {
            warn!(error = %e, persona = %persona.id, "Failed to store deferred memory");
        }
    }
}

/// Combine provider-reported reasoning with inline thinking blocks.
fn merge_thinking(reported: Option<String>, inline: Option<String>) -> Option<String> {
    let reported = reported.filter(|t| !t.trim().is_empty());
    match (reported, inline) {
        (Some(r), Some(i)) => Some(format!("{r}{THINKING_BLOCK_SEPARATOR}{i}")),
        (r, i) => r.or(i),
    }
}

fn elapsed_ms(ctx: &PipelineContext) -> u64 {
    ctx.started_at.elapsed().as_millis() as u64
}
