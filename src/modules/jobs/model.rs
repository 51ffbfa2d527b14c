use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::error::{ErrorKind, PipelineError, user_message};
use crate::pipeline::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Failure recorded on a job by the terminate stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn user_message(&self) -> String {
        user_message(self.kind, &self.message)
    }
}

impl From<&PipelineError> for JobFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub transformations: Vec<Operation>,
    pub status: JobStatus,
    pub source_key: String,
    pub extension: String,
    pub chunk_count: usize,
    pub result_key: Option<String>,
    pub error: Option<JobFailure>,
    /// Websocket connection ids that receive the job's final message.
    pub connections: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

pub fn source_key(job_id: &Uuid, extension: &str) -> String {
    format!("{job_id}/original.{extension}")
}

impl JobRecord {
    pub fn new(transformations: Vec<Operation>, extension: &str) -> Self {
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            transformations,
            status: JobStatus::Created,
            source_key: source_key(&id, extension),
            extension: extension.to_string(),
            chunk_count: 0,
            result_key: None,
            error: None,
            connections: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}
