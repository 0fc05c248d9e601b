//! StatusReporter trait definition and shared error types.

/// Errors that can occur while delivering a status update.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Sink for backup results, keyed by job id.
///
/// Callers log failures and carry on; a failed report never changes what
/// happens to the job.
#[async_trait::async_trait]
pub trait StatusReporter: Send + Sync {
    /// Publish `status` for job `job_id`.
    async fn report(&self, job_id: &str, status: &str) -> Result<(), NotifyError>;

    /// Human-readable name for this sink (e.g. "control-api").
    fn channel_name(&self) -> &str;
}
