use thiserror::Error;

use crate::models::job::JobStatus;

/// Every failure an analysis-client operation can report.
///
/// The type is `Clone` so one poll outcome can be handed to every caller
/// coalesced onto the same job.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend responded with status {status_code}: {body}")]
    Remote { status_code: u16, body: String },

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Job {job_id} did not finish after {attempts_made} status checks")]
    PollTimeout { job_id: String, attempts_made: u32 },

    #[error("Polling for job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("Submission of {filename} was cancelled before a job was created")]
    SubmissionCancelled { filename: String },

    #[error("Unrecognized analysis result type")]
    UnrecognizedResultType { payload: serde_json::Value },

    #[error("Job {job_id} is {status}, not completed")]
    JobNotCompleted { job_id: String, status: JobStatus },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Session storage error: {0}")]
    Session(String),
}

impl ClientError {
    /// Failures worth offering a retry for in the UI. The core never retries
    /// them on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::PollTimeout { .. })
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<garde::Report> for ClientError {
    fn from(report: garde::Report) -> Self {
        ClientError::Validation(report.to_string())
    }
}
