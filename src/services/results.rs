use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::models::job::AnalysisJob;
use crate::services::api::ApiClient;
use crate::services::poller::JobStatusSource;

/// Read access to analysis jobs on the backend.
pub struct ResultsService {
    api: Arc<ApiClient>,
}

impl ResultsService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// `GET /analysis/results`, newest first as the backend orders them.
    pub async fn list_results(&self) -> Result<Vec<AnalysisJob>, ClientError> {
        self.api.get_json("/analysis/results").await
    }

    /// `GET /analysis/results/{id}`.
    pub async fn get_result(&self, job_id: &str) -> Result<AnalysisJob, ClientError> {
        validate_job_id(job_id)?;
        self.api
            .get_json(&format!("/analysis/results/{job_id}"))
            .await
    }
}

/// Ids are placed into the URL path as-is, so anything that would change
/// the path or start a query or fragment is refused.
fn validate_job_id(job_id: &str) -> Result<(), ClientError> {
    if job_id.trim().is_empty() {
        return Err(ClientError::validation("job id must not be empty"));
    }
    let unsafe_char = job_id
        .chars()
        .find(|&c| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace() || c.is_control());
    if let Some(c) = unsafe_char {
        return Err(ClientError::validation(format!(
            "job id contains an unsupported character: {c:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl JobStatusSource for ResultsService {
    async fn fetch_job(&self, job_id: &str) -> Result<AnalysisJob, ClientError> {
        self.get_result(job_id).await
    }
}
