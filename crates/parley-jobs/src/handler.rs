//! Job handlers for each job type.

use async_trait::async_trait;

use parley_core::{Job, JobResult, JobType, Result};

/// Trait for job handlers.
///
/// Returning `Err` means the job could not be processed at all; the router
/// releases the idempotency lock and hands the error back to the transport.
/// Generation problems a user should see are reported as a failed
/// [`JobResult`] instead.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, job: &Job) -> Result<JobResult>;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// No-op handler for testing.
///
/// Succeeds with empty content and no metadata.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, job: &Job) -> Result<JobResult> {
        Ok(JobResult::success(job.request_id(), "", None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{
        DestinationKind, JobPayload, Persona, RequestContext, ResponseDestination,
    };

    fn job(job_type: JobType) -> Job {
        Job::new(
            job_type,
            JobPayload {
                request_id: "req-1".to_string(),
                message: None,
                attachments: Vec::new(),
                personality: Persona::new("p-1", "Ada"),
                context: RequestContext {
                    channel_id: "chan-1".to_string(),
                    ..Default::default()
                },
                response_destination: ResponseDestination {
                    kind: DestinationKind::Api,
                    channel_id: None,
                    callback_url: None,
                },
            },
        )
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new(JobType::AudioTranscription);
        assert_eq!(handler.job_type(), JobType::AudioTranscription);
        assert!(handler.can_handle(JobType::AudioTranscription));
        assert!(!handler.can_handle(JobType::LlmGeneration));

        let result = handler
            .execute(&job(JobType::AudioTranscription))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.request_id, "req-1");
        assert_eq!(result.content.as_deref(), Some(""));
    }

    #[test]
    fn test_handler_is_object_safe() {
        let handler: Box<dyn JobHandler> = Box::new(NoOpHandler::new(JobType::ImageDescription));
        assert!(handler.can_handle(JobType::ImageDescription));
    }
}
