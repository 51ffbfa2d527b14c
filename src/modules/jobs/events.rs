use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue message asking a worker to run the pipeline for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessJob {
    pub job_id: Uuid,
}
