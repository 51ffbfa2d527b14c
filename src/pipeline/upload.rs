//! Concurrent multipart transfer between byte streams and object storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt, stream};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::filter_graph::content_type_for;
use crate::common::error::{PipelineError, PipelineResult, StorageResult};
use crate::infrastructure::storage::{ObjectStore, UploadPart};

pub const DEFAULT_PART_SIZE: usize = 64 * 1024 * 1024;

/// Summary of a committed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub parts: usize,
    pub bytes: u64,
}

#[derive(Clone)]
pub struct MultipartUploadEngine {
    storage: Arc<dyn ObjectStore>,
    workers: usize,
}

impl MultipartUploadEngine {
    pub fn new(storage: Arc<dyn ObjectStore>, workers: usize) -> Self {
        Self {
            storage,
            workers: workers.max(1),
        }
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    /// Streams `reader` into `key` as concurrently uploaded parts of
    /// `part_size` bytes.
    ///
    /// Part numbers follow read order. Any failure aborts the remote session;
    /// nothing is committed.
    pub async fn upload<R>(&self, mut reader: R, key: &str, part_size: usize) -> PipelineResult<UploadReceipt>
    where
        R: AsyncRead + Unpin + Send,
    {
        if part_size == 0 {
            return Err(PipelineError::Validation("part size must be positive".into()));
        }

        let content_type = content_type_for(key);
        let first = read_part(&mut reader, part_size).await?;

        // Multipart sessions need at least one part; empty streams become
        // plain empty objects.
        if first.is_empty() {
            self.storage.put_object(key, Bytes::new(), &content_type).await?;
            info!("Stored empty object {}", key);
            return Ok(UploadReceipt {
                key: key.to_string(),
                parts: 0,
                bytes: 0,
            });
        }

        let upload_id = self
            .storage
            .create_multipart_upload(key, &content_type)
            .await?;
        info!("Start multipart uploading to {} ({})", key, upload_id);

        let mut pending = PendingSession::new(self.storage.clone(), key, &upload_id);
        let committed = match self
            .upload_parts(&mut reader, key, &upload_id, part_size, first)
            .await
        {
            Ok((parts, bytes)) => {
                let part_count = parts.len();
                self.storage
                    .complete_multipart_upload(key, &upload_id, parts)
                    .await
                    .map(|()| (part_count, bytes))
                    .map_err(PipelineError::from)
            }
            Err(e) => Err(e),
        };

        let (part_count, bytes) = match committed {
            Ok(done) => done,
            Err(e) => {
                error!("Upload of {} failed: {}", key, e);
                self.abort(key, &upload_id).await;
                pending.settle();
                return Err(e);
            }
        };
        pending.settle();

        info!(
            "All data uploaded to {}: {} parts, {:.2} MB",
            key,
            part_count,
            bytes as f64 / 1024.0 / 1024.0
        );

        Ok(UploadReceipt {
            key: key.to_string(),
            parts: part_count,
            bytes,
        })
    }

    pub async fn upload_file(&self, path: &Path, key: &str, part_size: usize) -> PipelineResult<UploadReceipt> {
        let file = File::open(path).await?;
        self.upload(file, key, part_size).await
    }

    async fn upload_parts<R>(
        &self,
        reader: &mut R,
        key: &str,
        upload_id: &str,
        part_size: usize,
        first: Bytes,
    ) -> PipelineResult<(Vec<UploadPart>, u64)>
    where
        R: AsyncRead + Unpin + Send,
    {
        let permits = Arc::new(Semaphore::new(self.workers));
        // Dropping the set on an early return cancels every in-flight part.
        let mut tasks: JoinSet<StorageResult<UploadPart>> = JoinSet::new();
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        let mut total: u64 = 0;
        let mut data = first;

        loop {
            total += data.len() as u64;

            // Waiting for a free worker also bounds how many parts sit in memory.
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| anyhow!("upload pool closed: {e}"))?;

            while let Some(finished) = tasks.try_join_next() {
                parts.push(joined(finished)?);
            }

            debug!(
                "Part {} of {}: {:.2} MB (total {:.2} MB)",
                part_number,
                key,
                data.len() as f64 / 1024.0 / 1024.0,
                total as f64 / 1024.0 / 1024.0
            );

            let storage = self.storage.clone();
            let key_owned = key.to_string();
            let upload_id_owned = upload_id.to_string();
            tasks.spawn(async move {
                let _permit = permit;
                storage
                    .upload_part(&key_owned, &upload_id_owned, part_number, data)
                    .await
            });

            part_number += 1;
            data = read_part(reader, part_size).await?;
            if data.is_empty() {
                break;
            }
        }

        while let Some(finished) = tasks.join_next().await {
            parts.push(joined(finished)?);
        }

        parts.sort_by_key(|p| p.part_number);
        Ok((parts, total))
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        if let Err(e) = self.storage.abort_multipart_upload(key, upload_id).await {
            warn!("Failed to abort multipart upload {} of {}: {}", upload_id, key, e);
        }
    }

    /// Downloads one object to a local file, returning its size.
    pub async fn download(&self, key: &str, destination: &Path) -> PipelineResult<u64> {
        debug!("Download {} to {}", key, destination.display());
        let mut reader = self.storage.open_object(key).await?;
        let mut file = File::create(destination).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }

    /// Downloads every key to the destination at the same index, concurrently.
    ///
    /// Returns the byte size of each download in input order. The first
    /// failure cancels the downloads still in flight.
    pub async fn download_many(&self, keys: &[String], destinations: &[PathBuf]) -> PipelineResult<Vec<u64>> {
        if keys.len() != destinations.len() {
            return Err(PipelineError::Validation(format!(
                "keys and destinations lists must have the same length ({} != {})",
                keys.len(),
                destinations.len()
            )));
        }

        info!("Downloading {} objects", keys.len());
        let downloads: Vec<_> = keys
            .iter()
            .cloned()
            .zip(destinations.iter().cloned())
            .map(|(key, dest)| {
                let engine = self.clone();
                async move { engine.download(&key, &dest).await }
            })
            .collect();

        stream::iter(downloads)
            .buffered(self.workers)
            .try_collect()
            .await
    }
}

/// Open multipart session that is aborted in the background if the upload
/// future is dropped before [`PendingSession::settle`] runs.
struct PendingSession {
    storage: Arc<dyn ObjectStore>,
    key: String,
    upload_id: String,
    settled: bool,
}

impl PendingSession {
    fn new(storage: Arc<dyn ObjectStore>, key: &str, upload_id: &str) -> Self {
        Self {
            storage,
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            settled: false,
        }
    }

    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Multipart upload {} of {} left open", self.upload_id, self.key);
            return;
        };

        warn!("Upload of {} cancelled, aborting {}", self.key, self.upload_id);
        let storage = self.storage.clone();
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        runtime.spawn(async move {
            if let Err(e) = storage.abort_multipart_upload(&key, &upload_id).await {
                warn!("Failed to abort multipart upload {} of {}: {}", upload_id, key, e);
            }
        });
    }
}

fn joined(result: Result<StorageResult<UploadPart>, JoinError>) -> PipelineResult<UploadPart> {
    let part = result.map_err(|e| anyhow!("part upload task failed: {e}"))??;
    Ok(part)
}

/// Reads until `part_size` bytes are buffered or the stream ends.
async fn read_part<R>(reader: &mut R, part_size: usize) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(part_size);
    while buf.len() < part_size {
        let remaining = (part_size - buf.len()) as u64;
        let n = (&mut *reader).take(remaining).read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
    }
    Ok(buf.freeze())
}
