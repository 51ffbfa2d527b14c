use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::info;
use uuid::Uuid;

use super::model::{JobFailure, JobRecord, JobStatus};

/// Persistence of job records. Updates are read-modify-write, last writer wins.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>>;

    async fn put(&self, job: &JobRecord) -> Result<()>;

    async fn set_status(&self, id: Uuid, status: JobStatus) -> Result<JobRecord> {
        update(self, id, |job| job.status = status).await
    }

    /// Moves the job from `from` to `to` unless another writer changed its
    /// status first. Returns `false` when the job was not in `from`.
    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool> {
        let Some(mut job) = self.get(id).await? else {
            return Err(anyhow!("job {id} not found"));
        };
        if job.status != from {
            return Ok(false);
        }
        job.status = to;
        job.touch();
        self.put(&job).await?;
        Ok(true)
    }

    async fn set_chunk_count(&self, id: Uuid, chunk_count: usize) -> Result<JobRecord> {
        update(self, id, |job| job.chunk_count = chunk_count).await
    }

    /// Writes the terminal state of a job.
    async fn finish(&self, id: Uuid, outcome: Result<String, JobFailure>) -> Result<JobRecord> {
        update(self, id, move |job| match outcome {
            Ok(result_key) => {
                job.status = JobStatus::Completed;
                job.result_key = Some(result_key);
                job.error = None;
            }
            Err(failure) => {
                job.status = JobStatus::Failed;
                job.error = Some(failure);
            }
        })
        .await
    }

    async fn add_connection(&self, id: Uuid, connection_id: &str) -> Result<JobRecord> {
        let connection_id = connection_id.to_string();
        update(self, id, move |job| {
            if !job.connections.contains(&connection_id) {
                job.connections.push(connection_id);
            }
        })
        .await
    }

    async fn remove_connection(&self, id: Uuid, connection_id: &str) -> Result<JobRecord> {
        update(self, id, |job| job.connections.retain(|c| c != connection_id)).await
    }
}

/// Applies `change` to the stored record of `id` and writes it back.
pub async fn update<S, F>(store: &S, id: Uuid, change: F) -> Result<JobRecord>
where
    S: JobStore + ?Sized,
    F: FnOnce(&mut JobRecord) + Send,
{
    let mut job = store
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("job {id} not found"))?;
    change(&mut job);
    job.touch();
    store.put(&job).await?;
    Ok(job)
}

pub fn job_key(id: &Uuid) -> String {
    format!("job:{id}")
}

/// Replaces `KEYS[1]` with `ARGV[2]` only while it still holds `ARGV[1]`.
const COMPARE_AND_SET: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
";

/// Job records as JSON strings under `job:{id}`.
#[derive(Clone)]
pub struct RedisJobStore {
    client: Client,
}

impl RedisJobStore {
    /// Opens a client and checks that the server answers.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let client = Client::open(connection_string)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Connected to Redis job store");
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn get_raw(&self, conn: &mut MultiplexedConnection, id: Uuid) -> Result<Option<String>> {
        Ok(conn.get(job_key(&id)).await?)
    }
}

fn decode(id: Uuid, json: &str) -> Result<JobRecord> {
    serde_json::from_str(json).with_context(|| format!("corrupt job record {id}"))
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let raw = self.get_raw(&mut conn, id).await?;
        raw.map(|json| decode(id, &json)).transpose()
    }

    async fn put(&self, job: &JobRecord) -> Result<()> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(job)?;
        let _: () = conn.set(job_key(&job.id), json).await?;
        Ok(())
    }

    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool> {
        let mut conn = self.conn().await?;
        let raw = self
            .get_raw(&mut conn, id)
            .await?
            .ok_or_else(|| anyhow!("job {id} not found"))?;
        let mut job = decode(id, &raw)?;
        if job.status != from {
            return Ok(false);
        }
        job.status = to;
        job.touch();

        let script = Script::new(COMPARE_AND_SET);
        let swapped: i32 = script
            .key(job_key(&id))
            .arg(raw)
            .arg(serde_json::to_string(&job)?)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}
