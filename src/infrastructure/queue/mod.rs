use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub mod rabbitmq;

pub use rabbitmq::RabbitMqService;

pub const PROCESSING_QUEUE: &str = "video_processing";

/// Hands a job over to whoever runs the pipeline.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job_id: Uuid) -> Result<()>;
}
