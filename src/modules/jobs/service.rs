use axum::http::StatusCode;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::dto::{CreateJobRequest, CreateJobResponse};
use super::model::{JobRecord, JobStatus};
use crate::common::error::PipelineError;
use crate::infrastructure::storage::ObjectReader;
use crate::pipeline::{Operation, config};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("{0}")]
    Invalid(String),
    #[error("Job {0} not found")]
    NotFound(Uuid),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl JobServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            JobServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            JobServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            JobServiceError::Conflict(_) => StatusCode::CONFLICT,
            JobServiceError::Pipeline(PipelineError::Config(_) | PipelineError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the client.
    pub fn public_message(&self) -> String {
        match self {
            JobServiceError::Pipeline(e @ PipelineError::Config(_)) => e.user_message(),
            JobServiceError::Pipeline(PipelineError::Validation(m)) => m.clone(),
            JobServiceError::Pipeline(e) => e.user_message(),
            JobServiceError::Store(_) => "An internal error has occurred.".to_string(),
            other => other.to_string(),
        }
    }
}

type ServiceResult<T> = Result<T, JobServiceError>;

pub struct JobService;

impl JobService {
    fn normalize_extension(raw: &str) -> ServiceResult<String> {
        let extension = raw.trim().trim_start_matches('.').to_ascii_lowercase();
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(JobServiceError::Invalid(format!(
                "Invalid source extension: '{raw}'"
            )));
        }
        Ok(extension)
    }

    /// Validates the declaration, stores a new job and presigns the source
    /// upload.
    pub async fn create(state: &AppState, req: CreateJobRequest) -> ServiceResult<CreateJobResponse> {
        req.validate()
            .map_err(|e| JobServiceError::Invalid(e.to_string()))?;
        let extension = Self::normalize_extension(&req.extension)?;

        let operations = Operation::from_values(&req.transformations)?;
        config::compile(&operations)?;

        let job = JobRecord::new(operations, &extension);
        state.jobs.put(&job).await?;

        let expiry = state.settings.presign_expiry;
        let upload_url = state
            .storage
            .presign_put(&job.source_key, expiry)
            .await
            .map_err(PipelineError::from)?;
        info!("Created job {} expecting {}", job.id, job.source_key);

        Ok(CreateJobResponse {
            job_id: job.id,
            source_key: job.source_key,
            upload_url,
            expires_in_secs: expiry.as_secs(),
        })
    }

    pub async fn get(state: &AppState, id: Uuid) -> ServiceResult<JobRecord> {
        state
            .jobs
            .get(id)
            .await?
            .ok_or(JobServiceError::NotFound(id))
    }

    /// Queues a freshly created job for processing. Only the caller that
    /// moves the job out of `CREATED` dispatches it.
    pub async fn start(state: &AppState, id: Uuid) -> ServiceResult<JobRecord> {
        Self::get(state, id).await?;
        let claimed = state
            .jobs
            .transition(id, JobStatus::Created, JobStatus::Running)
            .await?;
        if !claimed {
            return Err(JobServiceError::Conflict(format!(
                "Job {id} was already started"
            )));
        }

        if let Err(e) = state.dispatcher.dispatch(id).await {
            warn!("Dispatch of job {} failed, releasing it: {:#}", id, e);
            state.jobs.set_status(id, JobStatus::Created).await?;
            return Err(e.into());
        }
        info!("Job {} queued", id);
        Self::get(state, id).await
    }

    /// Opens the final artifact of a completed job.
    pub async fn open_result(state: &AppState, id: Uuid) -> ServiceResult<(String, ObjectReader)> {
        let job = Self::get(state, id).await?;
        let key = match (job.status, job.result_key) {
            (JobStatus::Completed, Some(key)) => key,
            (status, _) => {
                return Err(JobServiceError::Conflict(format!(
                    "Job {id} has no result (status {status:?})"
                )));
            }
        };

        let reader = state
            .storage
            .open_object(&key)
            .await
            .map_err(PipelineError::from)?;
        Ok((key, reader))
    }
}
