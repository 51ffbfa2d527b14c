use anyhow::Result;
use futures_util::StreamExt;
use lapin::options::BasicAckOptions;
use tracing::{error, info, warn};

use crate::infrastructure::queue::{PROCESSING_QUEUE, RabbitMqService};
use crate::modules::jobs::events::ProcessJob;
use crate::pipeline::Workflow;

/// Consumes start messages and runs one job at a time.
pub async fn start_pipeline_worker(queue: RabbitMqService, workflow: Workflow) -> Result<()> {
    let mut consumer = queue.consume(PROCESSING_QUEUE, "pipeline_worker").await?;
    info!("Pipeline worker listening on '{}'", PROCESSING_QUEUE);

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!("Broken delivery on '{}': {}", PROCESSING_QUEUE, e);
                continue;
            }
        };

        match serde_json::from_slice::<ProcessJob>(&delivery.data) {
            Ok(ProcessJob { job_id }) => match workflow.run(job_id).await {
                Ok(outcome) => info!(
                    "Job {} finished with {} chunks into {}",
                    job_id, outcome.chunks, outcome.result_key
                ),
                Err(e) => error!("Job {} failed: {}", job_id, e),
            },
            Err(e) => error!("Failed to parse job message: {}", e),
        }

        // Failures are recorded on the job, so the message is never requeued.
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!("Failed to ack message: {}", e);
        }
    }

    warn!("Pipeline worker consumer closed");
    Ok(())
}
