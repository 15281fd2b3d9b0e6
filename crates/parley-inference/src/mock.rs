//! Mock generation backend for deterministic testing.
//!
//! Replies are scripted per call in order; once the script runs out, the
//! default reply is returned. Every call is logged with the overrides and the
//! context exactly as the backend received them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use parley_inference::mock::MockGenerationBackend;
//!
//! let backend = MockGenerationBackend::new()
//!     .with_reply("first answer")
//!     .with_reply("second answer");
//!
//! // ... run the orchestrator ...
//! assert_eq!(backend.generate_call_count(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use parley_core::{
    ConversationContext, GenerationBackend, GenerationFailure, GenerationOutput,
    GenerationOverrides, Persona, ResolvedAuth,
};

type ContextMutation = Arc<dyn Fn(&mut ConversationContext) + Send + Sync>;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Output(GenerationOutput),
    Failure(GenerationFailure),
}

/// A logged generate call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub persona_id: String,
    pub message: String,
    pub overrides: GenerationOverrides,
    /// Context as received, before any mutation by the mock.
    pub context: ConversationContext,
    pub timestamp: Instant,
}

/// Mock generation backend for testing.
#[derive(Clone)]
pub struct MockGenerationBackend {
    script: Arc<Mutex<VecDeque<MockReply>>>,
    default_reply: MockReply,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    mutation: Option<ContextMutation>,
    latency_ms: u64,
}

impl MockGenerationBackend {
    /// Create a new mock backend that answers "Mock response".
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: MockReply::Output(GenerationOutput::new("Mock response")),
            call_log: Arc::new(Mutex::new(Vec::new())),
            mutation: None,
            latency_ms: 0,
        }
    }

    /// Queue a plain text reply.
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.with_output(GenerationOutput::new(content))
    }

    /// Queue a full output.
    pub fn with_output(self, output: GenerationOutput) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockReply::Output(output));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, failure: GenerationFailure) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(MockReply::Failure(failure));
        self
    }

    /// Reply used once the script is exhausted.
    pub fn with_default_reply(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Mutate the received context on every call, like a backend that
    /// injects attachment descriptions into history.
    pub fn with_context_mutation<F>(mut self, mutation: F) -> Self
    where
        F: Fn(&mut ConversationContext) + Send + Sync + 'static,
    {
        self.mutation = Some(Arc::new(mutation));
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    /// Get number of generate calls.
    pub fn generate_call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(
        &self,
        persona: &Persona,
        message: &str,
        context: &mut ConversationContext,
        overrides: &GenerationOverrides,
        _auth: &ResolvedAuth,
    ) -> Result<GenerationOutput, GenerationFailure> {
        self.call_log.lock().unwrap().push(MockCall {
            persona_id: persona.id.clone(),
            message: message.to_string(),
            overrides: *overrides,
            context: context.clone(),
            timestamp: Instant::now(),
        });

        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }

        if let Some(mutation) = &self.mutation {
            mutation(context);
        }

        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        match reply {
            MockReply::Output(output) => Ok(output),
            MockReply::Failure(failure) => Err(failure),
        }
    }
}
