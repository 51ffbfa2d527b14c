use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Failures at the object storage seam.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage request failed: {0}")]
    Request(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Error taxonomy shared by every pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad user-supplied transformation declaration. Never retried.
    #[error("{0}")]
    Config(String),
    /// The external encoder crashed or exited with a non-zero status.
    #[error("encoder failed: {0}")]
    Encode(String),
    /// Broken internal invariant, e.g. mismatched list lengths.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The source media cannot satisfy the requested transformation.
    #[error("{0}")]
    InputSource(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error kind as recorded on the job and handed to the terminate stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Config,
    Encode,
    Validation,
    InputSource,
    Timeout,
    Internal,
}

const ENCODE_FAILED_MESSAGE: &str =
    "Video processing failed due to an error. Please review your configuration settings.";
const INTERNAL_ERROR_MESSAGE: &str = "An internal error has occurred.";

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::Encode(_) => ErrorKind::Encode,
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::InputSource(_) => ErrorKind::InputSource,
            PipelineError::Timeout(_) => ErrorKind::Timeout,
            PipelineError::Storage(_) | PipelineError::Io(_) | PipelineError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Message shown to the client that owns the job.
    pub fn user_message(&self) -> String {
        user_message(self.kind(), &self.to_string())
    }
}

/// Renders the client-facing message for a recorded failure.
///
/// Validation messages of user input are passed through verbatim; encoder
/// failures get a generic hint and everything else stays opaque.
pub fn user_message(kind: ErrorKind, detail: &str) -> String {
    match kind {
        ErrorKind::Config | ErrorKind::InputSource => detail.to_string(),
        ErrorKind::Encode => ENCODE_FAILED_MESSAGE.to_string(),
        _ => INTERNAL_ERROR_MESSAGE.to_string(),
    }
}
