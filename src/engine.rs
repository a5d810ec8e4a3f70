//! Upload engine
//!
//! The entry point callers use: one engine per bucket, holding the shared
//! client handle and the upload policy.
//!
//! # Example
//!
//! ```no_run
//! use kumo_uploadr::{Config, UploadEngine};
//! use kumo_uploadr::upload::IncomingFile;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! let engine = UploadEngine::from_config(&config)?;
//!
//! let file = IncomingFile::from_path("avatar.png").await?;
//! let result = engine.upload_file(file, "avatars/").await?;
//! println!("uploaded to {}", result.location);
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::s3::{self, ClientHandle, CredentialsProvider, DeleteWait, StorageClientFactory};
use crate::upload::multipart::key_timestamp;
use crate::upload::{
    BatchOrchestrator, IncomingFile, TransactionCoordinator, UploadError, UploadPolicy,
    UploadRequest, UploadResult,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Uploads files to, and deletes objects from, a single bucket
#[derive(Clone)]
pub struct UploadEngine {
    handle: ClientHandle,
    bucket: String,
    policy: Arc<UploadPolicy>,
    delete_wait: DeleteWait,
}

impl UploadEngine {
    pub fn new(
        handle: ClientHandle,
        bucket: impl Into<String>,
        policy: UploadPolicy,
        delete_wait: DeleteWait,
    ) -> Self {
        Self {
            handle,
            bucket: bucket.into(),
            policy: Arc::new(policy),
            delete_wait,
        }
    }

    /// Build an engine from configuration, resolving credentials eagerly
    pub fn from_config(config: &Config) -> Result<Self, UploadError> {
        let credentials = CredentialsProvider::resolve(&config.storage)
            .map_err(|e| UploadError::CredentialError(e.to_string()))?;
        let handle = StorageClientFactory::get_client(&credentials, &config.storage)?;

        Ok(Self::new(
            handle,
            config.storage.bucket.clone(),
            config.upload_policy(),
            DeleteWait::from(&config.delete),
        ))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Upload one file; any failure is returned as `Err`
    pub async fn upload_file(&self, file: IncomingFile, prefix: &str) -> Result<UploadResult, UploadError> {
        self.upload_file_with_cancel(file, prefix, &CancellationToken::new())
            .await
    }

    pub async fn upload_file_with_cancel(
        &self,
        file: IncomingFile,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, UploadError> {
        let coordinator = TransactionCoordinator::new(self.handle.clone(), &self.bucket, self.policy.clone());
        let request = UploadRequest::new(file, prefix, 0);
        coordinator
            .run(&request, &key_timestamp(Utc::now()), cancel)
            .await
    }

    /// Upload many files concurrently
    ///
    /// Returns one result per file in completion order; failures are reported
    /// in the results, never as an error.
    pub async fn upload_files(&self, files: Vec<IncomingFile>, prefix: &str) -> Vec<UploadResult> {
        self.upload_files_with_cancel(files, prefix, &CancellationToken::new())
            .await
    }

    pub async fn upload_files_with_cancel(
        &self,
        files: Vec<IncomingFile>,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Vec<UploadResult> {
        let requests = files
            .into_iter()
            .enumerate()
            .map(|(order, file)| UploadRequest::new(file, prefix, order))
            .collect();

        BatchOrchestrator::new(self.handle.clone(), &self.bucket, self.policy.clone())
            .upload_many(requests, cancel)
            .await
    }

    /// Delete `key` and wait for the backend to confirm it is gone
    pub async fn delete_object(&self, key: &str) -> Result<(), UploadError> {
        self.delete_object_with_cancel(key, &CancellationToken::new())
            .await
    }

    pub async fn delete_object_with_cancel(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        s3::delete_object(self.handle.as_ref(), &self.bucket, key, &self.delete_wait, cancel).await
    }

    /// Read a file's full payload
    pub async fn read_bytes(&self, file: &IncomingFile) -> Result<Bytes, UploadError> {
        file.read_bytes().await
    }
}
