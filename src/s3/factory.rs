//! Storage client factory
//!
//! Builds the shared [`ClientHandle`] every upload pipeline talks to. There is
//! no global client; callers hold the handle and pass it down explicitly.

use crate::config::StorageConfig;
use crate::s3::credentials::CredentialsProviderTrait;
use crate::s3::{S3Client, S3ClientConfig, StorageBackend};
use crate::upload::UploadError;
use std::sync::Arc;
use std::time::Duration;

/// Shared, immutable handle to a storage backend
pub type ClientHandle = Arc<dyn StorageBackend>;

/// Creates [`ClientHandle`]s from credentials and storage settings
pub struct StorageClientFactory;

impl StorageClientFactory {
    /// Build a client bound to `config.region`
    ///
    /// Credentials are checked before the client is built, so a blank key
    /// fails here rather than on the first request.
    pub fn get_client(
        credentials: &dyn CredentialsProviderTrait,
        config: &StorageConfig,
    ) -> Result<ClientHandle, UploadError> {
        let credentials = credentials.credentials();
        credentials
            .validate()
            .map_err(|e| UploadError::CredentialError(e.to_string()))?;

        let client_config = S3ClientConfig {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            timeout: config.timeout_seconds.map(Duration::from_secs),
        };

        let client = S3Client::new(client_config, credentials)
            .map_err(|e| UploadError::CredentialError(e.to_string()))?;

        tracing::debug!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = %client.endpoint(),
            "Created storage client"
        );

        Ok(Arc::new(client))
    }
}
