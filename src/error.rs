use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnhanceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bucket not allowed: {0}")]
    BucketNotAllowed(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Upload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnhanceError {
    /// Errors caused by the uploaded content rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EnhanceError::InvalidInput(_)
                | EnhanceError::BucketNotAllowed(_)
                | EnhanceError::UnsupportedFormat(_)
                | EnhanceError::PayloadTooLarge { .. }
                | EnhanceError::InvalidImage(_)
        )
    }
}

/// Failure contract shared by every model backend.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    #[error("{program} exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Expected output not produced: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("Image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote object storage failures; never surfaced to HTTP clients.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    Backend(#[from] object_store::Error),

    #[error("Upload rejected: {0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, EnhanceError>;
