use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::model::{JobFailure, JobRecord, JobStatus};
use crate::pipeline::Operation;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateJobRequest {
    /// Ordered `{ "operation": ..., "opts": ... }` objects.
    #[validate(length(min = 1, max = 16, message = "Between 1 and 16 transformations are required"))]
    #[schema(value_type = Vec<Object>)]
    pub transformations: Vec<Value>,
    /// Container extension of the source that will be uploaded.
    #[validate(length(min = 1, max = 8, message = "Extension must be 1-8 characters"))]
    pub extension: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub source_key: String,
    /// Presigned PUT URL for the source file.
    pub upload_url: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub status: JobStatus,
    pub transformations: Vec<Operation>,
    pub source_key: String,
    pub chunk_count: usize,
    pub result_key: Option<String>,
    pub error: Option<JobFailure>,
    /// Client-facing message for finished jobs.
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<JobRecord> for JobResponse {
    fn from(job: JobRecord) -> Self {
        let message = match job.status {
            JobStatus::Completed => Some(crate::pipeline::terminate::SUCCESS_MESSAGE.to_string()),
            JobStatus::Failed => job.error.as_ref().map(JobFailure::user_message),
            _ => None,
        };
        Self {
            id: job.id,
            status: job.status,
            transformations: job.transformations,
            source_key: job.source_key,
            chunk_count: job.chunk_count,
            result_key: job.result_key,
            error: job.error,
            message,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
