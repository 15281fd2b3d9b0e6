//! Data models for jobs, conversation context, generation, and results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error as ThisError;
use uuid::Uuid;

use crate::defaults::UNKNOWN_USER_KEY;
use crate::error::{Error, Result};

/// Error string returned when a trigger message was already claimed.
pub const DUPLICATE_MESSAGE_ERROR: &str = "Duplicate message - already processed";

// =============================================================================
// JOBS
// =============================================================================

/// Type of job to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Generate a conversational response for a persona
    LlmGeneration,
    /// Transcribe an audio attachment (preprocessing, synchronous wait)
    AudioTranscription,
    /// Describe an image attachment (preprocessing, synchronous wait)
    ImageDescription,
}

impl JobType {
    /// Every job type, in declaration order.
    pub const ALL: [JobType; 3] = [
        JobType::LlmGeneration,
        JobType::AudioTranscription,
        JobType::ImageDescription,
    ];

    /// Wire name of this job type.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::LlmGeneration => "llm-generation",
            JobType::AudioTranscription => "audio-transcription",
            JobType::ImageDescription => "image-description",
        }
    }

    /// Whether results of this type are persisted and published for async delivery.
    ///
    /// Preprocessing jobs are awaited synchronously by their caller, so they
    /// skip the durable record and the result stream.
    pub fn requires_delivery_tracking(&self) -> bool {
        matches!(self, JobType::LlmGeneration)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownJobType(s.to_string()))
    }
}

/// A job delivered by the queue transport.
///
/// On the wire the job is a single flat object: `jobType` sits next to the
/// payload fields (`requestId`, `message`, `personality`, ...). The declared
/// type is kept as the raw string so an unrecognized type can be reported
/// verbatim. `id` is transport metadata and may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Queue-assigned job ID, if the transport provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub job_type: String,
    #[serde(flatten)]
    pub payload: JobPayload,
}

impl Job {
    /// Create a job of a known type.
    pub fn new(job_type: JobType, payload: JobPayload) -> Self {
        Self {
            id: None,
            job_type: job_type.as_str().to_string(),
            payload,
        }
    }

    /// Set the queue-assigned job ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parse the declared job type.
    pub fn kind(&self) -> Result<JobType> {
        self.job_type.parse()
    }

    pub fn request_id(&self) -> &str {
        &self.payload.request_id
    }

    /// Job ID if assigned, otherwise the request ID.
    pub fn job_or_request_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.payload.request_id)
    }

    /// Result cache key: `{userId|"unknown"}:{jobId|requestId}`.
    pub fn cache_key(&self) -> String {
        let user = self
            .payload
            .context
            .user_id
            .as_deref()
            .unwrap_or(UNKNOWN_USER_KEY);
        format!("{}:{}", user, self.job_or_request_id())
    }
}

/// Job payload as produced by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub request_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub personality: Persona,
    pub context: RequestContext,
    pub response_destination: ResponseDestination,
}

/// Who asked, where, and in reply to what.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// External (platform) user ID.
    #[serde(default)]
    pub user_id: Option<String>,
    pub channel_id: String,
    /// Platform message that triggered this job; enables idempotency.
    #[serde(default)]
    pub trigger_message_id: Option<String>,
    /// Internal user ID; enables usage logging.
    #[serde(default)]
    pub user_internal_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
}

/// Where the finished response should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDestination {
    #[serde(rename = "type")]
    pub kind: DestinationKind,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// Delivery channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    Discord,
    Webhook,
    Api,
}

/// A file attached to the triggering message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub content_type: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Filled in by preprocessing (transcript or image description).
    #[serde(default)]
    pub description: Option<String>,
}

// =============================================================================
// PERSONA AND RESOLVED ARTIFACTS
// =============================================================================

/// Persona (personality) a response is generated as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
}

impl Persona {
    /// Minimal persona with only an ID and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            display_name: None,
            model: None,
            system_prompt: None,
            temperature: None,
            frequency_penalty: None,
        }
    }
}

/// Which layer the effective persona config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigSource {
    /// The persona's own defaults.
    Personality,
    /// A per-user override for this persona.
    UserPersonality,
    /// The user's global default config.
    UserDefault,
}

/// Effective persona config after applying user overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub persona: Persona,
    pub source: ConfigSource,
}

/// Credentials resolved for the generation call.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedAuth {
    pub provider: String,
    pub api_key: Option<String>,
    /// True when the requester has no key of their own and uses the free tier.
    pub is_guest_mode: bool,
}

impl fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedAuth")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("is_guest_mode", &self.is_guest_mode)
            .finish()
    }
}

// =============================================================================
// CONVERSATION CONTEXT
// =============================================================================

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
    System,
}

/// One message of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub content: String,
    #[serde(default)]
    pub message_id: Option<String>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::User,
            content: content.into(),
            message_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ConversationRole::Assistant,
            content: content.into(),
            message_id: None,
        }
    }
}

/// Prepared, mutable conversation context handed to the generation backend.
///
/// Backends may mutate it in place (e.g. injecting attachment descriptions),
/// so the orchestrator clones it before every attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    /// Oldest first.
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Free-form environment data (server/channel names, participants).
    #[serde(default)]
    pub environment: Option<JsonValue>,
}

impl ConversationContext {
    /// Build a context from the request payload.
    pub fn from_request(context: &RequestContext, attachments: &[Attachment]) -> Self {
        Self {
            history: context.conversation_history.clone(),
            attachments: attachments.to_vec(),
            user_id: context.user_id.clone(),
            channel_id: Some(context.channel_id.clone()),
            environment: None,
        }
    }

    /// Contents of the most recent assistant turns, newest first.
    pub fn recent_assistant_messages(&self, limit: usize) -> Vec<&str> {
        self.history
            .iter()
            .rev()
            .filter(|t| t.role == ConversationRole::Assistant)
            .take(limit)
            .map(|t| t.content.as_str())
            .collect()
    }

    /// Drop the oldest `floor(len * fraction)` history turns.
    ///
    /// Returns the number of turns removed.
    pub fn drop_oldest_history(&mut self, fraction: f32) -> usize {
        let fraction = fraction.clamp(0.0, 1.0);
        let count = (self.history.len() as f32 * fraction).floor() as usize;
        self.history.drain(..count);
        count
    }
}

// =============================================================================
// GENERATION
// =============================================================================

/// Per-attempt generation parameter overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    /// Fraction of oldest history to drop before this attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_reduction: Option<f32>,
}

impl GenerationOverrides {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.frequency_penalty.is_none()
            && self.history_reduction.is_none()
    }
}

/// What the generation backend returned for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    pub content: String,
    #[serde(default)]
    pub tokens_in: Option<u32>,
    #[serde(default)]
    pub tokens_out: Option<u32>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub provider_used: Option<String>,
    /// Reasoning the provider returned out of band (not inline tags).
    #[serde(default)]
    pub thinking_content: Option<String>,
    /// Memory write deferred until the response is known to be kept.
    #[serde(default)]
    pub deferred_memory_data: Option<JsonValue>,
    #[serde(default)]
    pub incognito_mode_active: bool,
}

impl GenerationOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Error reported by a provider for a single request.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    /// HTTP status, when the failure came from an HTTP response.
    pub status: Option<u16>,
    /// Provider error code/type (e.g. `insufficient_quota`).
    pub code: Option<String>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Failure of a generation call.
///
/// Backends that retry transport errors internally report exhaustion as
/// [`GenerationFailure::Wrapped`]: the outer message is what users see, the
/// cause is what gets classified.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum GenerationFailure {
    #[error("{0}")]
    Direct(ProviderError),
    #[error("{message}")]
    Wrapped {
        message: String,
        attempts: u32,
        cause: Option<ProviderError>,
    },
}

impl GenerationFailure {
    /// The error that should be classified.
    pub fn cause(&self) -> Option<&ProviderError> {
        match self {
            GenerationFailure::Direct(e) => Some(e),
            GenerationFailure::Wrapped { cause, .. } => cause.as_ref(),
        }
    }

    /// Attempts made by the backend before giving up, if it retried.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            GenerationFailure::Direct(_) => None,
            GenerationFailure::Wrapped { attempts, .. } => Some(*attempts),
        }
    }
}

impl From<ProviderError> for GenerationFailure {
    fn from(e: ProviderError) -> Self {
        GenerationFailure::Direct(e)
    }
}

/// Classified failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    QuotaExceeded,
    ContextLengthExceeded,
    ModelNotFound,
    ContentFilter,
    ServerError,
    Timeout,
    Network,
    EmptyResponse,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::QuotaExceeded => "quota_exceeded",
            ErrorCategory::ContextLengthExceeded => "context_length_exceeded",
            ErrorCategory::ModelNotFound => "model_not_found",
            ErrorCategory::ContentFilter => "content_filter",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::EmptyResponse => "empty_response",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Whether trying again later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit
                | ErrorCategory::ServerError
                | ErrorCategory::Timeout
                | ErrorCategory::Network
                | ErrorCategory::EmptyResponse
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified error attached to failed results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub category: ErrorCategory,
    pub is_transient: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl ErrorInfo {
    pub fn new(category: ErrorCategory) -> Self {
        Self {
            category,
            is_transient: category.is_transient(),
            technical_message: None,
            attempts: None,
        }
    }

    pub fn with_technical_message(mut self, message: impl Into<String>) -> Self {
        self.technical_message = Some(message.into());
        self
    }

    pub fn with_attempts(mut self, attempts: Option<u32>) -> Self {
        self.attempts = attempts;
        self
    }
}

// =============================================================================
// DUPLICATE DETECTION
// =============================================================================

/// How a duplicate verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Character-bigram Dice coefficient.
    Bigram,
    /// No comparison matched.
    None,
}

/// Outcome of a cross-turn duplicate search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    /// How many assistant turns back the match was (1 = the previous one).
    pub match_index: Option<usize>,
    pub similarity: f64,
    pub method: DetectionMethod,
}

impl DuplicateVerdict {
    pub fn not_duplicate() -> Self {
        Self {
            is_duplicate: false,
            match_index: None,
            similarity: 0.0,
            method: DetectionMethod::None,
        }
    }

    pub fn matched(turns_back: usize, similarity: f64) -> Self {
        Self {
            is_duplicate: true,
            match_index: Some(turns_back),
            similarity,
            method: DetectionMethod::Bigram,
        }
    }
}

/// One completed call in a generation attempt chain.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationAttempt {
    /// 1-based.
    pub attempt: u32,
    pub overrides: GenerationOverrides,
    /// Raw backend output; `output.content` is the unprocessed text.
    pub output: GenerationOutput,
    /// Content with thinking blocks removed.
    pub visible_content: String,
    /// Inline thinking blocks, or the backend's out-of-band reasoning.
    pub thinking_content: Option<String>,
    /// Set when the content repeated an earlier assistant turn.
    pub duplicate: Option<DuplicateVerdict>,
}

impl GenerationAttempt {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate.is_some_and(|v| v.is_duplicate)
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// Metadata attached to job results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_source: Option<ConfigSource>,
    #[serde(default)]
    pub is_guest_mode: bool,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
    #[serde(default)]
    pub cross_turn_duplicate_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
}

/// Structured outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
}

impl JobResult {
    pub fn success(
        request_id: impl Into<String>,
        content: impl Into<String>,
        metadata: Option<ResultMetadata>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            content: Some(content.into()),
            error: None,
            metadata,
        }
    }

    pub fn failure(
        request_id: impl Into<String>,
        error: impl Into<String>,
        metadata: Option<ResultMetadata>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            content: None,
            error: Some(error.into()),
            metadata,
        }
    }

    /// Soft failure for a trigger message that was already claimed.
    pub fn duplicate_message(request_id: impl Into<String>) -> Self {
        Self::failure(request_id, DUPLICATE_MESSAGE_ERROR, None)
    }
}

/// Delivery state of a durable job result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// Durable record of a result awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub job_id: String,
    pub request_id: String,
    pub user_id: Option<String>,
    pub channel_id: String,
    pub response_destination: ResponseDestination,
    pub result: JobResult,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// New pending record for a job's result.
    pub fn pending(job: &Job, result: &JobResult) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id: job.job_or_request_id().to_string(),
            request_id: job.payload.request_id.clone(),
            user_id: job.payload.context.user_id.clone(),
            channel_id: job.payload.context.channel_id.clone(),
            response_destination: job.payload.response_destination.clone(),
            result: result.clone(),
            status: DeliveryStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Usage ledger entry for one successful generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub request_type: String,
}
