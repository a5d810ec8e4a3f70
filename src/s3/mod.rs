//! S3 Client module
//!
//! Defines the [`StorageBackend`] seam the upload engine talks to, and
//! [`S3Client`], its implementation on top of `aws-sdk-s3`.
//!
//! # Tracing
//!
//! All backend operations are instrumented with spans:
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | CreateMultipartUpload | `s3.create_multipart_upload` | bucket, key, content_type, upload_id |
//! | UploadPart | `s3.upload_part` | bucket, upload_id, part_number, bytes, etag |
//! | CompleteMultipartUpload | `s3.complete_multipart_upload` | bucket, upload_id, parts_count |
//! | AbortMultipartUpload | `s3.abort_multipart_upload` | bucket, upload_id |
//! | DeleteObject | `s3.delete_object` | bucket, key |
//! | HeadObject | `s3.head_object` | bucket, key, exists |

use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as SdkCompletedPart};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub mod credentials;
pub mod delete;
pub mod factory;

pub use credentials::{
    Credentials, CredentialsError, CredentialsProvider, CredentialsProviderTrait,
    EnvironmentCredentials, StaticCredentials,
};
pub use delete::{delete_object, DeleteWait};
pub use factory::{ClientHandle, StorageClientFactory};

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{operation} failed: {message}")]
    RequestError {
        operation: &'static str,
        message: String,
    },

    #[error("Response error: {0}")]
    ResponseError(String),
}

/// Result of CreateMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedUpload {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
}

/// Result of CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub location: String,
    pub key: String,
}

/// A part accepted by the backend, identified by its 1-based number and ETag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Multipart-capable object storage backend
///
/// Implementations must be safe to share across concurrently running upload
/// pipelines; the engine never mutates a backend after construction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Start a multipart upload session
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<CreatedUpload, S3ClientError>;

    /// Upload a single part, returning its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, S3ClientError>;

    /// Finalize a multipart upload from its ordered parts
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<CompletedUpload, S3ClientError>;

    /// Discard a multipart upload and its parts
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3ClientError>;

    /// Delete an object
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError>;

    /// Whether an object currently exists
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, S3ClientError>;
}

/// S3 Client configuration
#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub timeout: Option<Duration>,
}

/// S3 Client backed by `aws-sdk-s3`
///
/// SDK-level retries are disabled: retry policy belongs to the part
/// uploader so attempt counts stay exact.
#[derive(Debug, Clone)]
pub struct S3Client {
    config: S3ClientConfig,
    client: aws_sdk_s3::Client,
}

impl S3Client {
    /// Create a new S3 client
    pub fn new(config: S3ClientConfig, credentials: &Credentials) -> Result<Self, S3ClientError> {
        if config.region.trim().is_empty() {
            return Err(S3ClientError::ConfigError("region must not be empty".into()));
        }

        let sdk_credentials = aws_credential_types::Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token().map(str::to_string),
            None,
            "kumo-uploadr",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(sdk_credentials)
            .retry_config(RetryConfig::disabled());

        if let Some(ref endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        if let Some(timeout) = config.timeout {
            builder = builder.timeout_config(
                TimeoutConfig::builder().operation_timeout(timeout).build(),
            );
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            config,
        })
    }

    /// Get the default bucket name
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Get the region
    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.config.region))
    }

    /// Object URL used when the backend omits `Location` from a completion
    fn object_url(&self, bucket: &str, key: &str) -> String {
        match self.config.endpoint {
            Some(ref endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, self.config.region, key),
        }
    }
}

/// Flatten an SDK error into a readable message
fn request_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> S3ClientError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = match err.as_service_error() {
        Some(service) => format!(
            "{}: {}",
            service.code().unwrap_or("Unknown"),
            service.message().unwrap_or("no message")
        ),
        None => DisplayErrorContext(&err).to_string(),
    };
    S3ClientError::RequestError { operation, message }
}

fn sdk_part_number(part_number: u32) -> Result<i32, S3ClientError> {
    i32::try_from(part_number)
        .map_err(|_| S3ClientError::ConfigError(format!("part number {} out of range", part_number)))
}

#[async_trait]
impl StorageBackend for S3Client {
    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<CreatedUpload, S3ClientError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| request_error("CreateMultipartUpload", e))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| {
                S3ClientError::ResponseError("CreateMultipartUpload returned no upload id".into())
            })?
            .to_string();

        tracing::Span::current().record("s3.upload_id", upload_id.as_str());
        tracing::debug!(upload_id = %upload_id, "CreateMultipartUpload completed");

        Ok(CreatedUpload {
            upload_id,
            bucket: output.bucket().unwrap_or(bucket).to_string(),
            key: output.key().unwrap_or(key).to_string(),
        })
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, body),
        fields(
            s3.bucket = %bucket,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, S3ClientError> {
        let content_length = i64::try_from(body.len())
            .map_err(|_| S3ClientError::ConfigError("part body too large".into()))?;

        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(sdk_part_number(part_number)?)
            .content_length(content_length)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("UploadPart", e))?;

        let etag = output
            .e_tag()
            .ok_or_else(|| S3ClientError::ResponseError("UploadPart returned no ETag".into()))?
            .to_string();

        tracing::Span::current().record("s3.etag", etag.as_str());

        Ok(etag)
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(
            s3.bucket = %bucket,
            s3.upload_id = %upload_id,
            parts_count = parts.len()
        ),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<CompletedUpload, S3ClientError> {
        let sdk_parts = parts
            .into_iter()
            .map(|part| {
                Ok(SdkCompletedPart::builder()
                    .part_number(sdk_part_number(part.part_number)?)
                    .e_tag(part.etag)
                    .build())
            })
            .collect::<Result<Vec<_>, S3ClientError>>()?;

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(sdk_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| request_error("CompleteMultipartUpload", e))?;

        let key = output.key().unwrap_or(key).to_string();
        let location = output
            .location()
            .map(str::to_string)
            .unwrap_or_else(|| self.object_url(bucket, &key));

        Ok(CompletedUpload { location, key })
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self),
        fields(s3.bucket = %bucket, s3.upload_id = %upload_id),
        err
    )]
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3ClientError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| request_error("AbortMultipartUpload", e))?;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.delete_object",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key),
        err
    )]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("DeleteObject", e))?;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.head_object",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key, s3.exists = tracing::field::Empty),
        err
    )]
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, S3ClientError> {
        let result = self.client.head_object().bucket(bucket).key(key).send().await;

        let exists = match result {
            Ok(_) => true,
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found)
                {
                    false
                } else {
                    return Err(request_error("HeadObject", err));
                }
            }
        };

        tracing::Span::current().record("s3.exists", exists);
        Ok(exists)
    }
}
