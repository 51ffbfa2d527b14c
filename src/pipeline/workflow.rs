//! Stage sequencing for one job.
//!
//! probe → (audio extraction ‖ split) → transform per chunk → reduce, followed
//! by terminate and cleanup whatever the outcome. Each stage either succeeds
//! or fails the run; there are no retries.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::audio::AudioExtractor;
use super::cleanup::cleanup;
use super::config::compile;
use super::probe::SourceProbe;
use super::reduce::ChunkReducer;
use super::split::StreamingSplitPipeline;
use super::terminate::Terminator;
use super::transform::ChunkTransformer;
use super::upload::MultipartUploadEngine;
use crate::common::error::{PipelineError, PipelineResult};
use crate::config::settings::PipelineSettings;
use crate::infrastructure::notify::Notifier;
use crate::infrastructure::storage::ObjectStore;
use crate::modules::jobs::model::{JobFailure, JobStatus};
use crate::modules::jobs::repository::JobStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOutcome {
    pub job_id: Uuid,
    pub result_key: String,
    pub chunks: usize,
    pub audio_key: Option<String>,
}

#[derive(Clone)]
pub struct Workflow {
    storage: Arc<dyn ObjectStore>,
    jobs: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
    settings: PipelineSettings,
}

impl Workflow {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        jobs: Arc<dyn JobStore>,
        notifier: Arc<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            storage,
            jobs,
            notifier,
            settings,
        }
    }

    /// Runs the whole pipeline for `job_id`, then records the outcome and
    /// removes intermediate objects.
    pub async fn run(&self, job_id: Uuid) -> PipelineResult<WorkflowOutcome> {
        info!("Starting workflow for job {}", job_id);
        let result = self.execute(job_id).await;

        let outcome = match &result {
            Ok(done) => Ok(done.result_key.clone()),
            Err(e) => Err(JobFailure::from(e)),
        };
        let terminator = Terminator::new(self.jobs.clone(), self.notifier.clone());
        if let Err(e) = terminator.terminate(job_id, outcome).await {
            error!("Failed to terminate job {}: {}", job_id, e);
        }

        if let Err(e) = cleanup(&self.storage, &self.settings, job_id).await {
            warn!("Cleanup of job {} failed: {}", job_id, e);
        }

        result
    }

    async fn execute(&self, job_id: Uuid) -> PipelineResult<WorkflowOutcome> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| PipelineError::Validation(format!("job {job_id} does not exist")))?;
        self.jobs.set_status(job_id, JobStatus::Running).await?;

        let spec = compile(&job.transformations)?;
        info!("Job {} compiled to {:?}", job_id, spec);

        let probe = SourceProbe::new(self.storage.clone(), self.settings.clone());
        let report = probe.probe(&job.source_key, &spec).await?;

        let engine = MultipartUploadEngine::new(self.storage.clone(), self.settings.pool_size());
        let splitter = StreamingSplitPipeline::new(engine.clone(), self.settings.clone());
        let extractor = AudioExtractor::new(engine.clone(), self.settings.clone());

        let audio = async {
            match report.acodec.as_deref() {
                Some(acodec) => extractor
                    .extract(job_id, &job.source_key, acodec)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let split = splitter.split(job_id, &job.source_key, &job.extension);
        let (audio_key, chunks) = tokio::try_join!(audio, split)?;

        self.jobs.set_chunk_count(job_id, chunks.len()).await?;
        info!("Job {} split into {} chunks", job_id, chunks.len());

        let transformer = ChunkTransformer::new(engine.clone(), self.settings.clone());
        let processed = transformer
            .process_all(&chunks, &spec, self.settings.transform_concurrency())
            .await?;

        let keys: Vec<String> = processed.into_iter().map(|c| c.object_key).collect();
        let reducer = ChunkReducer::new(engine, self.settings.clone());
        let output = reducer.reduce(job_id, &keys).await?;
        info!(
            "Job {} reduced into {} ({:.2} MB)",
            job_id,
            output.key,
            output.bytes as f64 / 1024.0 / 1024.0
        );

        Ok(WorkflowOutcome {
            job_id,
            result_key: output.key,
            chunks: chunks.len(),
            audio_key,
        })
    }
}
