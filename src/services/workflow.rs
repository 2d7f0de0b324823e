use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::error::ClientError;
use crate::models::job::{AnalysisJob, AnalysisType};
use crate::services::api::ApiClient;
use crate::services::auth::AuthService;
use crate::services::dispatcher::{ResultDispatcher, Visualization};
use crate::services::poller::Poller;
use crate::services::results::ResultsService;
use crate::services::session::{SessionEvents, SessionStore};
use crate::services::submitter::{ImageFile, JobSubmitter};

/// Everything needed to take an image from upload to rendered result.
pub struct AnalysisWorkflow {
    pub auth: AuthService,
    pub submitter: JobSubmitter,
    pub results: Arc<ResultsService>,
    pub poller: Poller,
    pub dispatcher: ResultDispatcher,
}

impl AnalysisWorkflow {
    pub fn new(
        config: &AppConfig,
        session: Arc<dyn SessionStore>,
        events: SessionEvents,
    ) -> Result<Self, ClientError> {
        let api = Arc::new(ApiClient::new(
            &config.api_url,
            config.request_timeout(),
            session,
            events,
        )?);
        let results = Arc::new(ResultsService::new(Arc::clone(&api)));

        Ok(Self {
            auth: AuthService::new(Arc::clone(&api)),
            submitter: JobSubmitter::new(Arc::clone(&api)),
            poller: Poller::new(results.clone(), config.poll_policy()),
            results,
            dispatcher: ResultDispatcher::new(),
        })
    }

    /// Upload `file`, start an analysis and wait until it completes or fails.
    ///
    /// Cancelling before the backend has returned a job id gives
    /// [`ClientError::SubmissionCancelled`]; after that, [`ClientError::Cancelled`].
    pub async fn run(
        &self,
        file: &ImageFile,
        analysis_type: AnalysisType,
        cancel: &CancellationToken,
    ) -> Result<AnalysisJob, ClientError> {
        let asset = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(submission_cancelled(&file.file_name)),
            uploaded = self.submitter.upload_image(file) => uploaded?,
        };

        let created = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(submission_cancelled(&asset.filename)),
            created = self.submitter.request_analysis(&asset.filename, analysis_type, None) => created?,
        };

        let mut job = self.poller.await_completion(&created.id, cancel).await?;
        if job.analysis_type.is_none() {
            job.analysis_type = Some(analysis_type);
        }

        info!(job_id = %job.id, status = %job.status, "Analysis finished");
        Ok(job)
    }

    pub fn render(&self, job: &AnalysisJob) -> Result<Visualization, ClientError> {
        self.dispatcher.dispatch_job(job)
    }
}

fn submission_cancelled(filename: &str) -> ClientError {
    ClientError::SubmissionCancelled {
        filename: filename.to_string(),
    }
}
