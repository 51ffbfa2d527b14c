//! The chunked transcode pipeline: compile → split → transform → reduce.

use std::io::ErrorKind;
use std::path::Path;

use tracing::warn;

pub mod audio;
pub mod cleanup;
pub mod config;
pub mod encoder;
pub mod filter_graph;
pub mod probe;
pub mod reduce;
pub mod split;
pub mod terminate;
pub mod transform;
pub mod upload;
pub mod workflow;

pub use config::{Operation, OutputFormat, TransformSpec};
pub use filter_graph::EncodeInvocation;
pub use split::ChunkDescriptor;
pub use upload::{MultipartUploadEngine, UploadReceipt};
pub use workflow::Workflow;

/// Empties `dir`, creating it when missing. Scratch space belongs to exactly
/// one stage run.
pub(crate) async fn reset_scratch(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

pub(crate) async fn clear_scratch(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to clear scratch dir {}: {}", dir.display(), e);
        }
    }
}

/// Extension of the file name in an object key, without the dot.
pub fn extension_of(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_comes_from_file_name() {
        assert_eq!(extension_of("job/chunks/CHUNK-3.mov"), Some("mov"));
        assert_eq!(extension_of("job.v2/RESULT"), None);
        assert_eq!(extension_of("job/.hidden"), None);
    }

    #[tokio::test]
    async fn reset_scratch_empties_existing_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("split");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("CHUNK-0.mp4"), b"stale").await.unwrap();

        reset_scratch(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        clear_scratch(&dir).await;
        assert!(!dir.exists());
    }
}
