//! Error types for parley.

use thiserror::Error;

use crate::models::JobType;

/// Result type alias using parley's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for parley operations.
///
/// Generation failures reported by a provider are not represented here; they
/// are [`GenerationFailure`](crate::GenerationFailure) values and always end
/// up inside a failed [`JobResult`](crate::JobResult).
#[derive(Error, Debug)]
pub enum Error {
    /// The job declared a type this worker does not recognize.
    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    /// The job type is known but no handler was registered for it.
    #[error("No handler registered for job type: {0}")]
    NoHandler(JobType),

    /// A generation pipeline artifact was missing when the generation step ran.
    #[error("{step} must run before Generation ({artifact} is missing)")]
    PipelineOrder {
        step: &'static str,
        artifact: &'static str,
    },

    /// Inference/preprocessing failed inside a handler
    #[error("Inference error: {0}")]
    Inference(String),

    /// Idempotency lock service failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Result cache operation failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Durable delivery record could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Result stream publish failed
    #[error("Publish error: {0}")]
    Publish(String),

    /// Usage ledger write failed
    #[error("Usage logging error: {0}")]
    Usage(String),

    /// Deferred memory storage failed
    #[error("Memory storage error: {0}")]
    Memory(String),

    /// Queue transport error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unknown_job_type() {
        let err = Error::UnknownJobType("video-render".to_string());
        assert_eq!(err.to_string(), "Unknown job type: video-render");
    }

    #[test]
    fn test_error_display_no_handler() {
        let err = Error::NoHandler(JobType::AudioTranscription);
        assert_eq!(
            err.to_string(),
            "No handler registered for job type: audio-transcription"
        );
    }

    #[test]
    fn test_error_display_pipeline_order() {
        let err = Error::PipelineOrder {
            step: "ConfigStep",
            artifact: "config",
        };
        assert_eq!(
            err.to_string(),
            "ConfigStep must run before Generation (config is missing)"
        );
    }

    #[test]
    fn test_error_display_side_effects() {
        assert_eq!(
            Error::Persistence("db down".into()).to_string(),
            "Persistence error: db down"
        );
        assert_eq!(
            Error::Publish("stream closed".into()).to_string(),
            "Publish error: stream closed"
        );
        assert_eq!(
            Error::Usage("ledger full".into()).to_string(),
            "Usage logging error: ledger full"
        );
        assert_eq!(
            Error::Memory("vector store offline".into()).to_string(),
            "Memory storage error: vector store offline"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
