//! Source inspection ahead of splitting.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::config::TransformSpec;
use super::encoder;
use crate::common::error::{PipelineError, PipelineResult};
use crate::config::settings::PipelineSettings;
use crate::infrastructure::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub vcodec: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub video: VideoInfo,
    /// Only probed when audio extraction was requested.
    pub acodec: Option<String>,
}

pub fn video_probe_args(input: &str) -> Vec<String> {
    [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,codec_name",
        "-of",
        "default=noprint_wrappers=1",
        input,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

pub fn audio_probe_args(input: &str) -> Vec<String> {
    [
        "-v",
        "error",
        "-select_streams",
        "a:0",
        "-show_entries",
        "stream=codec_name",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
        input,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Parses `key=value` lines of the video stream probe.
pub fn parse_video_details(output: &str) -> PipelineResult<VideoInfo> {
    let mut width = None;
    let mut height = None;
    let mut vcodec = None;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "width" => width = value.parse::<u32>().ok(),
            "height" => height = value.parse::<u32>().ok(),
            "codec_name" => vcodec = Some(value.to_string()),
            _ => {}
        }
    }

    match (width, height) {
        (Some(width), Some(height)) => Ok(VideoInfo { width, height, vcodec }),
        _ => Err(PipelineError::InputSource(
            "Source has no readable video stream".to_string(),
        )),
    }
}

/// Rejects crop windows that do not fit into the source frame.
pub fn check_crop_dimensions(video: &VideoInfo, spec: &TransformSpec) -> PipelineResult<()> {
    let Some(crop) = spec.crop() else {
        return Ok(());
    };

    let (x, y) = crop.offsets_for(video.width, video.height);
    let fits_x = x >= 0 && x + i64::from(crop.width) <= i64::from(video.width);
    let fits_y = y >= 0 && y + i64::from(crop.height) <= i64::from(video.height);

    if fits_x && fits_y {
        Ok(())
    } else {
        Err(PipelineError::InputSource(format!(
            "Crop dimensions and offsets are larger than video dimensions ({}x{})",
            video.width, video.height
        )))
    }
}

pub struct SourceProbe {
    storage: Arc<dyn ObjectStore>,
    settings: PipelineSettings,
}

impl SourceProbe {
    pub fn new(storage: Arc<dyn ObjectStore>, settings: PipelineSettings) -> Self {
        Self { storage, settings }
    }

    pub async fn probe(&self, source_key: &str, spec: &TransformSpec) -> PipelineResult<ProbeReport> {
        let url = self
            .storage
            .presign_get(source_key, self.settings.presign_expiry)
            .await?;
        let prober = self.settings.prober_path.as_path();

        let video = parse_video_details(&self.run(prober, video_probe_args(&url)).await?)?;
        info!(
            "Source {} is {}x{} ({})",
            source_key,
            video.width,
            video.height,
            video.vcodec.as_deref().unwrap_or("unknown codec")
        );
        check_crop_dimensions(&video, spec)?;

        let acodec = if spec.extract_audio {
            let codec = self.run(prober, audio_probe_args(&url)).await?;
            let codec = codec.trim();
            if codec.is_empty() {
                return Err(PipelineError::InputSource(
                    "Audio extraction requested but the source has no audio stream".to_string(),
                ));
            }
            Some(codec.to_string())
        } else {
            None
        };

        Ok(ProbeReport { video, acodec })
    }

    async fn run(&self, prober: &Path, args: Vec<String>) -> PipelineResult<String> {
        encoder::run(prober, &args, self.settings.encoder_timeout).await
    }
}
