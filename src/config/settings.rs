use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use crate::config::env::{self, EnvKey};

const MIB: usize = 1024 * 1024;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub redis_url: String,
    pub rabbitmq_url: String,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub pipeline: PipelineSettings,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            redis_url: env::get(EnvKey::RedisUrl)?,
            rabbitmq_url: env::get(EnvKey::RabbitMqUrl)?,
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_bucket: env::get(EnvKey::MinioBucket)?,
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            pipeline: PipelineSettings::from_env(),
        })
    }
}

/// Tunables of the chunked transcode pipeline.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineSettings {
    pub encoder_path: PathBuf,
    pub prober_path: PathBuf,
    /// Root of the per-job scratch directories.
    pub scratch_dir: PathBuf,
    pub chunk_seconds: u32,
    pub part_size_bytes: usize,
    /// Upload/download workers per logical core.
    pub workers_per_core: usize,
    pub poll_interval: Duration,
    /// Longest wait for the encoder to move past one chunk.
    pub chunk_wait_timeout: Duration,
    /// Hard limit on a single encoder process lifetime.
    pub encoder_timeout: Duration,
    pub presign_expiry: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            encoder_path: PathBuf::from("ffmpeg"),
            prober_path: PathBuf::from("ffprobe"),
            scratch_dir: std::env::temp_dir().join("chunkmill"),
            chunk_seconds: 10,
            part_size_bytes: 64 * MIB,
            workers_per_core: 5,
            poll_interval: Duration::from_millis(250),
            chunk_wait_timeout: Duration::from_secs(300),
            encoder_timeout: Duration::from_secs(3600),
            presign_expiry: Duration::from_secs(3600),
        }
    }
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            encoder_path: PathBuf::from(env::get_or(EnvKey::EncoderPath, "ffmpeg")),
            prober_path: PathBuf::from(env::get_or(EnvKey::ProberPath, "ffprobe")),
            scratch_dir: env::get(EnvKey::ScratchDir)
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            chunk_seconds: env::get_parsed(EnvKey::ChunkSeconds, defaults.chunk_seconds).max(1),
            part_size_bytes: env::get_parsed(EnvKey::PartSizeMb, 64usize).max(5) * MIB,
            workers_per_core: env::get_parsed(EnvKey::WorkerMultiplier, defaults.workers_per_core)
                .max(1),
            poll_interval: Duration::from_millis(env::get_parsed(EnvKey::PollIntervalMs, 250)),
            chunk_wait_timeout: Duration::from_secs(env::get_parsed(
                EnvKey::ChunkWaitTimeoutSecs,
                300,
            )),
            encoder_timeout: Duration::from_secs(env::get_parsed(EnvKey::EncoderTimeoutSecs, 3600)),
            presign_expiry: Duration::from_secs(env::get_parsed(EnvKey::PresignExpirySecs, 3600)),
        }
    }

    /// Size of one upload/download worker pool.
    pub fn pool_size(&self) -> usize {
        (num_cpus::get() * self.workers_per_core).max(1)
    }

    /// Number of chunks transformed at the same time.
    pub fn transform_concurrency(&self) -> usize {
        num_cpus::get().max(1)
    }

    pub fn job_scratch(&self, job_id: &uuid::Uuid, stage: &str) -> PathBuf {
        self.scratch_dir.join(job_id.to_string()).join(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.part_size_bytes, 64 * 1024 * 1024);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.chunk_seconds, 10);
        assert!(settings.pool_size() >= 5);
    }

    #[test]
    fn scratch_dirs_are_per_job_and_stage() {
        let settings = PipelineSettings {
            scratch_dir: PathBuf::from("/scratch"),
            ..PipelineSettings::default()
        };
        let id = uuid::Uuid::nil();
        assert_eq!(
            settings.job_scratch(&id, "split"),
            PathBuf::from("/scratch/00000000-0000-0000-0000-000000000000/split")
        );
    }
}
