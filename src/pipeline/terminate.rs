//! Final bookkeeping of a job: terminal status and client notification.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::error::PipelineResult;
use crate::infrastructure::notify::Notifier;
use crate::modules::jobs::model::{JobFailure, JobRecord};
use crate::modules::jobs::repository::JobStore;

pub const SUCCESS_MESSAGE: &str = "Job succeeded.";

/// Last stage of every run: records the outcome and tells the clients.
pub struct Terminator {
    jobs: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
}

impl Terminator {
    pub fn new(jobs: Arc<dyn JobStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { jobs, notifier }
    }

    pub async fn terminate(
        &self,
        job_id: Uuid,
        outcome: Result<String, JobFailure>,
    ) -> PipelineResult<JobRecord> {
        let message = match &outcome {
            Ok(result_key) => {
                info!("Job {} completed with {}", job_id, result_key);
                SUCCESS_MESSAGE.to_string()
            }
            Err(failure) => {
                warn!("Job {} failed ({:?}): {}", job_id, failure.kind, failure.message);
                failure.user_message()
            }
        };

        let job = self.jobs.finish(job_id, outcome).await?;

        if job.connections.is_empty() {
            info!("No connections to notify for job {}", job_id);
        } else {
            let payload = json!({ "msg": message }).to_string();
            self.notifier.notify(&job.connections, &payload).await;
        }

        Ok(job)
    }
}
