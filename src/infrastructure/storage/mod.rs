use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::common::error::StorageResult;

pub mod s3;

/// Streaming body of a stored object.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// One committed part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    /// 1-based, assigned in read order.
    pub part_number: i32,
    pub etag: String,
}

/// Blob store addressed by string keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Opens a multipart session and returns its upload id.
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> StorageResult<String>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<UploadPart>;

    /// Commits the session. `parts` must already be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadPart>,
    ) -> StorageResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> StorageResult<()>;

    async fn open_object(&self, key: &str) -> StorageResult<ObjectReader>;

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    async fn presign_put(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Deletes every object under any of the prefixes, returning how many
    /// objects were removed.
    async fn delete_prefixes(&self, prefixes: &[String]) -> StorageResult<usize>;
}
