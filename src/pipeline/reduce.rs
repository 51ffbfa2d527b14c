//! Reassembling processed chunks into the final artifact.
//!
//! Chunks are downloaded into order-encoding paths, listed in an ffconcat
//! manifest and stream-copied by the encoder straight into a multipart
//! upload, so the final object never lands on local disk.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use tracing::{info, warn};
use uuid::Uuid;

use super::encoder::EncoderProcess;
use super::filter_graph::muxer_for_extension;
use super::upload::MultipartUploadEngine;
use super::{clear_scratch, extension_of, reset_scratch};
use crate::common::error::{PipelineError, PipelineResult};
use crate::config::settings::PipelineSettings;

const MANIFEST_NAME: &str = "seglist.ffconcat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReduceOutput {
    pub key: String,
    pub extension: String,
    pub bytes: u64,
}

pub fn result_key(job_id: &Uuid, extension: &str) -> String {
    format!("{job_id}/RESULT.{extension}")
}

/// Local path of the `index`-th chunk; zero padding keeps lexical order equal
/// to sequence order.
pub fn local_chunk_path(dir: &Path, index: usize, extension: &str) -> PathBuf {
    dir.join(format!("CHUNK-{index:04}.{extension}"))
}

/// ffconcat manifest listing `paths` in the given order.
pub fn concat_manifest(paths: &[PathBuf]) -> String {
    let mut manifest = String::from("ffconcat version 1.0\n");
    for path in paths {
        let quoted = path.to_string_lossy().replace('\'', r"'\''");
        let _ = writeln!(manifest, "file '{quoted}'");
    }
    manifest
}

/// Encoder arguments for stream-copy concatenation to stdout.
pub fn concat_args(manifest: &Path, extension: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-v".into(),
        "error".into(),
        "-protocol_whitelist".into(),
        "concat,file,http,https,tcp,tls,crypto".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        manifest.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        muxer_for_extension(extension).to_string(),
    ];

    // ISO-BMFF containers need a fragmented layout to be written to a pipe.
    if matches!(extension, "mp4" | "m4v" | "mov") {
        args.push("-movflags".into());
        args.push("frag_keyframe+empty_moov".into());
    }

    args.push("pipe:1".into());
    args
}

pub struct ChunkReducer {
    engine: MultipartUploadEngine,
    settings: PipelineSettings,
}

impl ChunkReducer {
    pub fn new(engine: MultipartUploadEngine, settings: PipelineSettings) -> Self {
        Self { engine, settings }
    }

    /// Concatenates the objects at `keys`, in order, into `{job}/RESULT.{ext}`.
    pub async fn reduce(&self, job_id: Uuid, keys: &[String]) -> PipelineResult<ReduceOutput> {
        let first = keys.first().ok_or_else(|| {
            PipelineError::Validation(format!("no chunks to reduce for job {job_id}"))
        })?;
        let extension = extension_of(first)
            .ok_or_else(|| PipelineError::Validation(format!("chunk key {first} has no extension")))?
            .to_string();

        let scratch = self.settings.job_scratch(&job_id, "reduce");
        reset_scratch(&scratch).await?;
        let result = self.reduce_in(job_id, keys, &extension, &scratch).await;
        clear_scratch(&scratch).await;
        result
    }

    async fn reduce_in(
        &self,
        job_id: Uuid,
        keys: &[String],
        extension: &str,
        scratch: &Path,
    ) -> PipelineResult<ReduceOutput> {
        let destinations: Vec<PathBuf> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| local_chunk_path(scratch, i, extension_of(key).unwrap_or(extension)))
            .collect();

        info!("Download {} chunks of {}...", keys.len(), job_id);
        self.engine.download_many(keys, &destinations).await?;

        let manifest_path = scratch.join(MANIFEST_NAME);
        let manifest = concat_manifest(&destinations);
        tokio::fs::write(&manifest_path, &manifest).await?;
        info!("Seglist written to {}:\n{}", manifest_path.display(), manifest);

        let key = result_key(&job_id, extension);
        let args = concat_args(&manifest_path, extension);
        let mut encoder = EncoderProcess::spawn(&self.settings.encoder_path, &args, true)?;
        let stdout = encoder
            .take_stdout()
            .ok_or_else(|| anyhow!("encoder stdout was not captured"))?;

        let upload = tokio::time::timeout(
            self.settings.encoder_timeout,
            self.engine.upload(stdout, &key, self.settings.part_size_bytes),
        )
        .await;

        let receipt = match upload {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                encoder.kill().await;
                return Err(e);
            }
            Err(_) => {
                encoder.kill().await;
                return Err(PipelineError::Timeout(format!(
                    "reducing {job_id} exceeded {:?}",
                    self.settings.encoder_timeout
                )));
            }
        };

        // The stream may look complete even when the encoder failed, so the
        // exit status decides whether the object is kept.
        let waited = tokio::time::timeout(self.settings.encoder_timeout, encoder.wait()).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                encoder.kill().await;
                self.discard(&key).await;
                return Err(PipelineError::Timeout(format!(
                    "encoder for {job_id} did not exit after its output closed"
                )));
            }
        };
        info!("Encoder returned with {}", status);

        if let Err(e) = encoder.check(status).await {
            self.discard(&key).await;
            return Err(e);
        }

        Ok(ReduceOutput {
            key,
            extension: extension.to_string(),
            bytes: receipt.bytes,
        })
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.engine.storage().delete_prefixes(&[key.to_string()]).await {
            warn!("Failed to discard broken result {}: {}", key, e);
        }
    }
}
