//! Removal of intermediate objects and scratch files once a job ends.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::clear_scratch;
use crate::common::error::PipelineResult;
use crate::config::settings::PipelineSettings;
use crate::infrastructure::storage::ObjectStore;

/// Object prefixes holding a job's intermediate chunks.
pub fn intermediate_prefixes(job_id: &Uuid) -> Vec<String> {
    vec![format!("{job_id}/chunks/"), format!("{job_id}/processed/")]
}

/// Removes intermediate objects and the local scratch tree of a job. The
/// source, result and audio objects are kept.
pub async fn cleanup(
    storage: &Arc<dyn ObjectStore>,
    settings: &PipelineSettings,
    job_id: Uuid,
) -> PipelineResult<usize> {
    let deleted = storage.delete_prefixes(&intermediate_prefixes(&job_id)).await?;
    clear_scratch(&settings.scratch_dir.join(job_id.to_string())).await;
    info!("Cleaned up {} intermediate objects of {}", deleted, job_id);
    Ok(deleted)
}
