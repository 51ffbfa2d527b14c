use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chunkmill::app;
use chunkmill::config::settings::AppConfig;
use chunkmill::infrastructure::notify::WsHub;
use chunkmill::infrastructure::queue::RabbitMqService;
use chunkmill::infrastructure::storage::s3::StorageService;
use chunkmill::modules::jobs::repository::RedisJobStore;
use chunkmill::pipeline::Workflow;
use chunkmill::state::AppState;
use chunkmill::workers::pipeline::start_pipeline_worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chunkmill=info,tower_http=info")),
        )
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("missing required environment variable")?;

    let jobs = Arc::new(
        RedisJobStore::connect(&config.redis_url)
            .await
            .context("failed to connect to Redis")?,
    );
    let queue = RabbitMqService::new(&config.rabbitmq_url).await?;
    let storage = Arc::new(
        StorageService::new(
            &config.minio_url,
            &config.minio_bucket,
            &config.minio_access_key,
            &config.minio_secret_key,
        )
        .await,
    );
    let hub = WsHub::new();

    let workflow = Workflow::new(
        storage.clone(),
        jobs.clone(),
        Arc::new(hub.clone()),
        config.pipeline.clone(),
    );
    let worker_queue = queue.clone();
    tokio::spawn(async move {
        if let Err(e) = start_pipeline_worker(worker_queue, workflow).await {
            error!("Pipeline worker stopped: {:#}", e);
        }
    });

    let state = AppState::new(config.pipeline.clone(), jobs, storage, Arc::new(queue), hub);
    let app = app::create_app(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
