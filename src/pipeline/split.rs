//! Segmenting the source while uploading finished chunks.
//!
//! The encoder writes `CHUNK-0`, `CHUNK-1`, ... into a scratch directory. A
//! chunk is only treated as finished once its successor exists or the
//! encoder has exited, and is then uploaded in the background while the
//! encoder keeps going.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info};
use uuid::Uuid;

use super::encoder::EncoderProcess;
use super::upload::MultipartUploadEngine;
use super::{clear_scratch, reset_scratch};
use crate::common::error::{PipelineError, PipelineResult};
use crate::config::settings::PipelineSettings;

/// One uploaded chunk of a job's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub object_key: String,
    pub job_id: Uuid,
    pub extension: String,
    pub size_bytes: u64,
    pub sequence_index: usize,
}

pub fn chunk_file_name(index: usize, extension: &str) -> String {
    format!("CHUNK-{index}.{extension}")
}

pub fn chunk_key(job_id: &Uuid, index: usize, extension: &str) -> String {
    format!("{job_id}/chunks/{}", chunk_file_name(index, extension))
}

/// Encoder arguments for stream-copy segmenting into `pattern`.
pub fn segment_args(input: &str, chunk_seconds: u32, pattern: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-i".into(),
        input.to_string(),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        "segment".into(),
        "-segment_time".into(),
        chunk_seconds.to_string(),
        "-reset_timestamps".into(),
        "1".into(),
        pattern.to_string_lossy().into_owned(),
    ]
}

type UploadSet = JoinSet<PipelineResult<ChunkDescriptor>>;

pub struct StreamingSplitPipeline {
    engine: MultipartUploadEngine,
    settings: PipelineSettings,
}

impl StreamingSplitPipeline {
    pub fn new(engine: MultipartUploadEngine, settings: PipelineSettings) -> Self {
        Self { engine, settings }
    }

    /// Splits the stored source object of `job_id` into uploaded chunks,
    /// returned in sequence order.
    pub async fn split(
        &self,
        job_id: Uuid,
        source_key: &str,
        extension: &str,
    ) -> PipelineResult<Vec<ChunkDescriptor>> {
        let scratch = self.settings.job_scratch(&job_id, "split");
        reset_scratch(&scratch).await?;

        let source_url = self
            .engine
            .storage()
            .presign_get(source_key, self.settings.presign_expiry)
            .await?;

        let result = self.split_input(job_id, &source_url, extension, &scratch).await;
        clear_scratch(&scratch).await;
        result
    }

    /// Runs the segmenting encoder over `input` with `scratch` as its output
    /// directory.
    pub async fn split_input(
        &self,
        job_id: Uuid,
        input: &str,
        extension: &str,
        scratch: &Path,
    ) -> PipelineResult<Vec<ChunkDescriptor>> {
        let pattern = scratch.join(format!("CHUNK-%d.{extension}"));
        info!(
            "Start splitting {} into {} with chunks of ~{}s",
            job_id,
            pattern.display(),
            self.settings.chunk_seconds
        );

        let args = segment_args(input, self.settings.chunk_seconds, &pattern);
        let mut encoder = EncoderProcess::spawn(&self.settings.encoder_path, &args, false)?;

        let permits = Arc::new(Semaphore::new(self.settings.pool_size()));
        let mut uploads = UploadSet::new();
        let mut chunks = Vec::new();
        let watched = self
            .watch(&mut encoder, &permits, &mut uploads, &mut chunks, job_id, scratch, extension)
            .await;

        let checked = match watched {
            Ok(status) => encoder.check(status).await,
            Err(e) => {
                encoder.kill().await;
                Err(e)
            }
        };
        if let Err(e) = checked {
            settle_uploads(&permits, &mut uploads).await;
            return Err(e);
        }

        while let Some(finished) = uploads.join_next().await {
            match joined(finished) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => {
                    settle_uploads(&permits, &mut uploads).await;
                    return Err(e);
                }
            }
        }

        chunks.sort_by_key(|c| c.sequence_index);
        info!("All {} chunks of {} uploaded", chunks.len(), job_id);
        Ok(chunks)
    }

    async fn watch(
        &self,
        encoder: &mut EncoderProcess,
        permits: &Arc<Semaphore>,
        uploads: &mut UploadSet,
        chunks: &mut Vec<ChunkDescriptor>,
        job_id: Uuid,
        scratch: &Path,
        extension: &str,
    ) -> PipelineResult<ExitStatus> {
        let started = Instant::now();
        let mut waiting_since = Instant::now();
        let mut exit: Option<ExitStatus> = None;
        let mut index = 0usize;

        loop {
            while let Some(finished) = uploads.try_join_next() {
                chunks.push(joined(finished)?);
            }

            if exit.is_none() {
                exit = encoder.try_status()?;
            }
            if let Some(status) = exit.filter(|s| !s.success()) {
                return Ok(status);
            }

            let current = scratch.join(chunk_file_name(index, extension));
            if tokio::fs::try_exists(&current).await? {
                let next = scratch.join(chunk_file_name(index + 1, extension));
                if exit.is_some() || tokio::fs::try_exists(&next).await? {
                    self.dispatch(uploads, permits.clone(), job_id, index, current, extension);
                    index += 1;
                    waiting_since = Instant::now();
                    continue;
                }
                debug!("Chunk {} of {} is still being written", index, job_id);
            } else if let Some(status) = exit {
                info!("Encoder finished after {} chunks", index);
                return Ok(status);
            } else {
                debug!("Waiting for chunk {} of {}", index, job_id);
            }

            if started.elapsed() > self.settings.encoder_timeout {
                return Err(PipelineError::Timeout(format!(
                    "splitting {job_id} exceeded {:?}",
                    self.settings.encoder_timeout
                )));
            }
            if waiting_since.elapsed() > self.settings.chunk_wait_timeout {
                return Err(PipelineError::Timeout(format!(
                    "chunk {index} of {job_id} not completed within {:?}",
                    self.settings.chunk_wait_timeout
                )));
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    fn dispatch(
        &self,
        uploads: &mut UploadSet,
        permits: Arc<Semaphore>,
        job_id: Uuid,
        index: usize,
        path: PathBuf,
        extension: &str,
    ) {
        let engine = self.engine.clone();
        let part_size = self.settings.part_size_bytes;
        let key = chunk_key(&job_id, index, extension);
        let extension = extension.to_string();

        uploads.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| anyhow!("chunk upload pool closed: {e}"))?;

            info!("Start upload {}...", path.display());
            let receipt = engine.upload_file(&path, &key, part_size).await?;
            tokio::fs::remove_file(&path).await?;
            info!(
                "Uploaded {} to {} ({:.2} MB)",
                path.display(),
                key,
                receipt.bytes as f64 / 1024.0 / 1024.0
            );

            Ok(ChunkDescriptor {
                object_key: key,
                job_id,
                extension,
                size_bytes: receipt.bytes,
                sequence_index: index,
            })
        });
    }
}

/// Lets in-flight chunk uploads finish or abort their sessions after the
/// stage failed. Uploads still waiting for a worker never start.
async fn settle_uploads(permits: &Semaphore, uploads: &mut UploadSet) {
    permits.close();
    let mut pending = 0usize;
    while uploads.join_next().await.is_some() {
        pending += 1;
    }
    debug!("Settled {} chunk uploads after failure", pending);
}

fn joined(
    result: Result<PipelineResult<ChunkDescriptor>, JoinError>,
) -> PipelineResult<ChunkDescriptor> {
    result.map_err(|e| anyhow!("chunk upload task failed: {e}"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_names_follow_sequence() {
        let id = Uuid::nil();
        assert_eq!(chunk_file_name(12, "mov"), "CHUNK-12.mov");
        assert_eq!(
            chunk_key(&id, 0, "mp4"),
            "00000000-0000-0000-0000-000000000000/chunks/CHUNK-0.mp4"
        );
    }

    #[test]
    fn segment_args_reset_timestamps() {
        let args = segment_args("https://src", 10, Path::new("/s/CHUNK-%d.mp4"));
        assert!(args.windows(2).any(|w| w == ["-segment_time", "10"]));
        assert!(args.windows(2).any(|w| w == ["-reset_timestamps", "1"]));
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
        assert_eq!(args.last().map(String::as_str), Some("/s/CHUNK-%d.mp4"));
    }

    #[test]
    fn descriptors_serialize_camel_case() {
        let chunk = ChunkDescriptor {
            object_key: "k".into(),
            job_id: Uuid::nil(),
            extension: "mp4".into(),
            size_bytes: 3,
            sequence_index: 1,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["objectKey"], "k");
        assert_eq!(json["sequenceIndex"], 1);
        assert_eq!(json["sizeBytes"], 3);
    }
}
