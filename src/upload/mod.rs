//! Upload module
//!
//! The multipart upload engine: validation, chunking, per-part retry, the
//! per-file transaction and the concurrent batch runner.

use crate::s3::S3ClientError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncReadExt;

pub mod batch;
pub mod chunker;
pub mod multipart;
pub mod part;
pub mod retry;
pub mod sniff;
pub mod validator;

pub use batch::{sort_by_submission_order, BatchOrchestrator};
pub use chunker::{ChunkSpec, Chunker};
pub use multipart::{TransactionCoordinator, UploadSession};
pub use part::PartUploader;
pub use retry::BackoffStrategy;
pub use validator::Validator;

/// Number of leading bytes inspected for content sniffing
pub const SNIFF_LEN: usize = 512;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File {filename} is empty")]
    EmptyFile { filename: String },

    #[error("File too large, maximum file size is {limit}")]
    FileTooLarge {
        filename: String,
        size: u64,
        limit: String,
    },

    #[error("Invalid upload policy: {0}")]
    InvalidPolicy(String),

    #[error("File type {filename} is not supported, given type {content_type}")]
    UnsupportedType {
        filename: String,
        content_type: String,
    },

    #[error("Failed to read {filename}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File {filename} declared {declared} bytes but {actual} bytes were read")]
    SizeMismatch {
        filename: String,
        declared: u64,
        actual: u64,
    },

    #[error("{0}")]
    Transport(#[from] S3ClientError),

    #[error("Part #{part_number} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        part_number: u32,
        attempts: u32,
        #[source]
        source: S3ClientError,
    },

    #[error("Failed to abort multipart upload {upload_id}: {source}; original failure: {cause}")]
    AbortFailure {
        upload_id: String,
        #[source]
        source: S3ClientError,
        cause: Box<UploadError>,
    },

    #[error("Credential error: {0}")]
    CredentialError(String),

    #[error("Failed to delete {key}: {reason}")]
    DeleteError { key: String, reason: String },

    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Validation failures never reach the storage backend
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UploadError::EmptyFile { .. }
                | UploadError::FileTooLarge { .. }
                | UploadError::UnsupportedType { .. }
                | UploadError::InvalidPolicy(_)
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::EmptyFile { .. } => "empty_file",
            UploadError::FileTooLarge { .. } => "file_too_large",
            UploadError::UnsupportedType { .. } => "unsupported_type",
            UploadError::InvalidPolicy(_) => "invalid_policy",
            UploadError::Io { .. } => "io",
            UploadError::SizeMismatch { .. } => "size_mismatch",
            UploadError::Transport(_) => "transport",
            UploadError::RetryExhausted { .. } => "retry_exhausted",
            UploadError::AbortFailure { .. } => "abort_failure",
            UploadError::CredentialError(_) => "credentials",
            UploadError::DeleteError { .. } => "delete",
            UploadError::Cancelled => "cancelled",
        }
    }
}

/// Upload policy, read-only once built
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    /// Largest accepted payload in bytes
    pub max_size: u64,
    /// Accepted sniffed content types, compared exactly
    pub allowed_types: Vec<String>,
    /// Attempts per part, including the first
    pub max_retries: u32,
    pub max_part_size: u64,
    pub backoff: BackoffStrategy,
}

impl UploadPolicy {
    /// Reject policies the transaction cannot run with
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.max_part_size == 0 {
            return Err(UploadError::InvalidPolicy(
                "max_part_size must be greater than zero".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(UploadError::InvalidPolicy("max_retries must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        crate::config::UploadConfig::default().to_policy()
    }
}

/// Where a file's bytes live
#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// A file handed to the engine by a caller
///
/// `content_type` is whatever the client claimed; it is logged but never used
/// to accept or reject the file.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub source: FileSource,
}

impl IncomingFile {
    /// Wrap an in-memory payload
    pub fn from_bytes(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            filename: filename.into(),
            content_type: None,
            size: data.len() as u64,
            source: FileSource::Memory(data),
        }
    }

    /// Reference a file on disk, taking its size from metadata
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            filename,
            content_type: None,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Attach the client-declared content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Override the declared size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Read up to `limit` leading bytes
    pub async fn read_head(&self, limit: usize) -> Result<Bytes, UploadError> {
        match self.source {
            FileSource::Memory(ref data) => Ok(data.slice(..data.len().min(limit))),
            FileSource::Path(ref path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| self.io_error(e))?;
                let mut head = Vec::with_capacity(limit);
                file.take(limit as u64)
                    .read_to_end(&mut head)
                    .await
                    .map_err(|e| self.io_error(e))?;
                Ok(Bytes::from(head))
            }
        }
    }

    /// Read the whole payload eagerly
    pub async fn read_bytes(&self) -> Result<Bytes, UploadError> {
        match self.source {
            FileSource::Memory(ref data) => Ok(data.clone()),
            FileSource::Path(ref path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> UploadError {
        UploadError::Io {
            filename: self.filename.clone(),
            source,
        }
    }
}

/// One unit of work for the engine
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: IncomingFile,
    /// Prepended to the generated object key
    pub prefix: String,
    /// Position in the caller's submission
    pub order: usize,
}

impl UploadRequest {
    pub fn new(file: IncomingFile, prefix: impl Into<String>, order: usize) -> Self {
        Self {
            file,
            prefix: prefix.into(),
            order,
        }
    }
}

/// Outcome for one submitted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub filename: String,
    pub success: bool,
    #[serde(rename = "filepath")]
    pub location: String,
    pub key: String,
    pub message: String,
    pub order: usize,
}

impl UploadResult {
    pub fn success(filename: &str, order: usize, location: String, key: String) -> Self {
        Self {
            filename: filename.to_string(),
            success: true,
            location,
            key,
            message: format!("File {} successfully uploaded", filename),
            order,
        }
    }

    pub fn failure(filename: &str, order: usize, error: &UploadError) -> Self {
        Self {
            filename: filename.to_string(),
            success: false,
            location: String::new(),
            key: String::new(),
            message: format!("{}: {}", filename, error),
            order,
        }
    }
}
