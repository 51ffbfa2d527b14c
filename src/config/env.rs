use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    RedisUrl,
    RabbitMqUrl,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    EncoderPath,
    ProberPath,
    ScratchDir,
    ChunkSeconds,
    PartSizeMb,
    WorkerMultiplier,
    PollIntervalMs,
    ChunkWaitTimeoutSecs,
    EncoderTimeoutSecs,
    PresignExpirySecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET_VIDEOS",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::EncoderPath => "FFMPEG_PATH",
            EnvKey::ProberPath => "FFPROBE_PATH",
            EnvKey::ScratchDir => "SCRATCH_DIR",
            EnvKey::ChunkSeconds => "CHUNK_SECONDS",
            EnvKey::PartSizeMb => "UPLOAD_PART_SIZE_MB",
            EnvKey::WorkerMultiplier => "WORKERS_PER_CORE",
            EnvKey::PollIntervalMs => "CHUNK_POLL_INTERVAL_MS",
            EnvKey::ChunkWaitTimeoutSecs => "CHUNK_WAIT_TIMEOUT_SECS",
            EnvKey::EncoderTimeoutSecs => "ENCODER_TIMEOUT_SECS",
            EnvKey::PresignExpirySecs => "PRESIGN_EXPIRY_SECS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
