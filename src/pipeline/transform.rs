//! Per-chunk application of a job's transformations.

use futures_util::{StreamExt, TryStreamExt, stream};
use tracing::info;
use uuid::Uuid;

use super::config::TransformSpec;
use super::encoder;
use super::filter_graph;
use super::split::ChunkDescriptor;
use super::upload::MultipartUploadEngine;
use super::{clear_scratch, reset_scratch};
use crate::common::error::PipelineResult;
use crate::config::settings::PipelineSettings;

pub fn processed_key(job_id: &Uuid, index: usize, extension: &str) -> String {
    format!("{job_id}/processed/CHUNK-{index}.{extension}")
}

/// Applies a job's [`TransformSpec`] to individual chunks.
#[derive(Clone)]
pub struct ChunkTransformer {
    engine: MultipartUploadEngine,
    settings: PipelineSettings,
}

impl ChunkTransformer {
    pub fn new(engine: MultipartUploadEngine, settings: PipelineSettings) -> Self {
        Self { engine, settings }
    }

    /// Transforms one chunk and returns the descriptor of the processed copy.
    pub async fn process(
        &self,
        chunk: &ChunkDescriptor,
        spec: &TransformSpec,
    ) -> PipelineResult<ChunkDescriptor> {
        let scratch = self
            .settings
            .job_scratch(&chunk.job_id, &format!("transform-{}", chunk.sequence_index));
        reset_scratch(&scratch).await?;
        let result = self.process_in(chunk, spec, &scratch).await;
        clear_scratch(&scratch).await;
        result
    }

    async fn process_in(
        &self,
        chunk: &ChunkDescriptor,
        spec: &TransformSpec,
        scratch: &std::path::Path,
    ) -> PipelineResult<ChunkDescriptor> {
        info!("Processing {}", chunk.object_key);

        let chunk_url = self
            .engine
            .storage()
            .presign_get(&chunk.object_key, self.settings.presign_expiry)
            .await?;

        let stem = scratch.join(format!("out-CHUNK-{}", chunk.sequence_index));
        let invocation = filter_graph::build(spec, &chunk_url, &stem, &chunk.extension);
        info!("Executing encoder with {:?}", invocation.args);

        encoder::run(
            &self.settings.encoder_path,
            &invocation.args,
            self.settings.encoder_timeout,
        )
        .await?;

        let key = processed_key(&chunk.job_id, chunk.sequence_index, &invocation.extension);
        let receipt = self
            .engine
            .upload_file(&invocation.output, &key, self.settings.part_size_bytes)
            .await?;

        Ok(ChunkDescriptor {
            object_key: key,
            extension: invocation.extension,
            size_bytes: receipt.bytes,
            ..chunk.clone()
        })
    }

    /// Transforms `chunks` with at most `concurrency` encoders at a time,
    /// keeping the input order in the result.
    pub async fn process_all(
        &self,
        chunks: &[ChunkDescriptor],
        spec: &TransformSpec,
        concurrency: usize,
    ) -> PipelineResult<Vec<ChunkDescriptor>> {
        let tasks: Vec<_> = chunks
            .iter()
            .cloned()
            .map(|chunk| {
                let transformer = self.clone();
                let spec = spec.clone();
                async move { transformer.process(&chunk, &spec).await }
            })
            .collect();

        stream::iter(tasks)
            .buffered(concurrency.max(1))
            .try_collect()
            .await
    }
}
