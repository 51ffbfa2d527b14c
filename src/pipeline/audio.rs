//! Stream-copy extraction of the source audio track.

use std::path::Path;

use tracing::info;
use uuid::Uuid;

use super::encoder;
use super::upload::MultipartUploadEngine;
use super::{clear_scratch, reset_scratch};
use crate::common::error::PipelineResult;
use crate::config::settings::PipelineSettings;

pub fn audio_key(job_id: &Uuid, acodec: &str) -> String {
    format!("{job_id}/AUDIO.{acodec}")
}

/// Copies the first audio stream of the source without re-encoding.
pub struct AudioExtractor {
    engine: MultipartUploadEngine,
    settings: PipelineSettings,
}

impl AudioExtractor {
    pub fn new(engine: MultipartUploadEngine, settings: PipelineSettings) -> Self {
        Self { engine, settings }
    }

    pub async fn extract(&self, job_id: Uuid, source_key: &str, acodec: &str) -> PipelineResult<String> {
        let scratch = self.settings.job_scratch(&job_id, "audio");
        reset_scratch(&scratch).await?;
        let result = self.extract_in(job_id, source_key, acodec, &scratch).await;
        clear_scratch(&scratch).await;
        result
    }

    async fn extract_in(
        &self,
        job_id: Uuid,
        source_key: &str,
        acodec: &str,
        scratch: &Path,
    ) -> PipelineResult<String> {
        let url = self
            .engine
            .storage()
            .presign_get(source_key, self.settings.presign_expiry)
            .await?;
        let local_path = scratch.join(format!("AUDIO.{acodec}"));
        let args = vec![
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            url,
            "-vn".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            local_path.to_string_lossy().into_owned(),
        ];

        info!("Start audio extraction of {}", job_id);
        encoder::run(&self.settings.encoder_path, &args, self.settings.encoder_timeout).await?;

        let key = audio_key(&job_id, acodec);
        self.engine
            .upload_file(&local_path, &key, self.settings.part_size_bytes)
            .await?;
        info!("Audio of {} stored at {}", job_id, key);
        Ok(key)
    }
}
