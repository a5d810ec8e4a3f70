//! Multipart upload transaction
//!
//! Drives one file through `Validating → Created → Uploading → Completing`,
//! aborting the backend session whenever a part cannot be uploaded.

use super::chunker::Chunker;
use super::part::PartUploader;
use super::validator::Validator;
use super::{UploadError, UploadPolicy, UploadRequest, UploadResult};
use crate::metrics;
use crate::s3::ClientHandle;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub use crate::s3::CompletedPart;

/// Multipart upload state
///
/// Owned by exactly one running transaction and dropped when it finishes.
#[derive(Debug)]
pub struct UploadSession {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub parts: Vec<CompletedPart>,
}

/// Timestamp embedded in object keys: RFC 3339, second precision, UTC
pub fn key_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Object key for an upload: `prefix + timestamp + "-" + filename`
pub fn object_key(prefix: &str, timestamp: &str, filename: &str) -> String {
    format!("{}{}-{}", prefix, timestamp, filename)
}

/// Runs the upload transaction for one file
#[derive(Clone)]
pub struct TransactionCoordinator {
    backend: ClientHandle,
    bucket: String,
    policy: Arc<UploadPolicy>,
}

impl TransactionCoordinator {
    pub fn new(backend: ClientHandle, bucket: impl Into<String>, policy: Arc<UploadPolicy>) -> Self {
        Self {
            backend,
            bucket: bucket.into(),
            policy,
        }
    }

    /// Upload one file, recording metrics for the outcome
    #[tracing::instrument(
        name = "upload.file",
        skip(self, request, timestamp, cancel),
        fields(
            upload.filename = %request.file.filename,
            upload.order = request.order,
            upload.bytes = request.file.size,
            s3.bucket = %self.bucket,
            s3.key = tracing::field::Empty,
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    pub async fn run(
        &self,
        request: &UploadRequest,
        timestamp: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, UploadError> {
        let start = Instant::now();
        let outcome = self.execute(request, timestamp, cancel).await;
        metrics::record_upload_duration(&self.bucket, start.elapsed().as_secs_f64());

        match outcome {
            Ok(ref result) => {
                metrics::record_upload_success(&self.bucket, request.file.size);
                tracing::info!(key = %result.key, location = %result.location, "Upload completed");
            }
            Err(ref e) => {
                metrics::record_upload_failure(&self.bucket);
                metrics::record_error(e.kind());
                tracing::error!(filename = %request.file.filename, error = %e, "Upload failed");
            }
        }

        outcome
    }

    async fn execute(
        &self,
        request: &UploadRequest,
        timestamp: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, UploadError> {
        let file = &request.file;

        // Validating
        let content_type = Validator::new(&self.policy).validate_file(file).await?;

        let payload = file.read_bytes().await?;
        let actual = payload.len() as u64;
        if actual != file.size {
            return Err(UploadError::SizeMismatch {
                filename: file.filename.clone(),
                declared: file.size,
                actual,
            });
        }

        // Created
        let key = object_key(&request.prefix, timestamp, &file.filename);
        tracing::Span::current().record("s3.key", key.as_str());

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        // Not raced: dropping an in-flight create would leak the session
        let created = self
            .backend
            .create_multipart_upload(&self.bucket, &key, content_type)
            .await?;
        tracing::Span::current().record("s3.upload_id", created.upload_id.as_str());

        let mut session = UploadSession {
            upload_id: created.upload_id,
            bucket: created.bucket,
            key: created.key,
            parts: Vec::new(),
        };

        if cancel.is_cancelled() {
            return Err(self.abort(&session, UploadError::Cancelled).await);
        }

        // Uploading
        let uploader = PartUploader::new(self.backend.as_ref(), self.policy.max_retries, &self.policy.backoff);
        for chunk in Chunker::new(file.size, self.policy.max_part_size) {
            let body = payload.slice(chunk.range());
            match uploader.upload_part(&session, chunk.part_number, body, cancel).await {
                Ok(part) => session.parts.push(part),
                Err(cause) => return Err(self.abort(&session, cause).await),
            }
        }

        if cancel.is_cancelled() {
            return Err(self.abort(&session, UploadError::Cancelled).await);
        }

        // Completing
        let parts_count = session.parts.len();
        let completed = match self
            .backend
            .complete_multipart_upload(
                &session.bucket,
                &session.key,
                &session.upload_id,
                std::mem::take(&mut session.parts),
            )
            .await
        {
            Ok(completed) => completed,
            Err(e) => {
                metrics::record_multipart_upload_failure(&self.bucket);
                return Err(e.into());
            }
        };

        metrics::record_multipart_upload_success(&self.bucket, parts_count);
        tracing::debug!(upload_id = %session.upload_id, parts = parts_count, "Completed multipart upload");

        Ok(UploadResult::success(
            &file.filename,
            request.order,
            completed.location,
            completed.key,
        ))
    }

    /// Abort `session`, returning the error the caller should surface
    async fn abort(&self, session: &UploadSession, cause: UploadError) -> UploadError {
        tracing::warn!(
            upload_id = %session.upload_id,
            parts_uploaded = session.parts.len(),
            error = %cause,
            "Aborting multipart upload"
        );
        metrics::record_multipart_upload_failure(&self.bucket);

        match self
            .backend
            .abort_multipart_upload(&session.bucket, &session.key, &session.upload_id)
            .await
        {
            Ok(()) => {
                metrics::record_abort(true);
                cause
            }
            Err(source) => {
                metrics::record_abort(false);
                tracing::error!(
                    upload_id = %session.upload_id,
                    error = %source,
                    "Failed to abort multipart upload"
                );
                UploadError::AbortFailure {
                    upload_id: session.upload_id.clone(),
                    source,
                    cause: Box::new(cause),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::{CompletedUpload, CreatedUpload, MockStorageBackend, S3ClientError};
    use crate::upload::IncomingFile;
    use chrono::TimeZone;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

    fn png(len: usize) -> Vec<u8> {
        let mut data = PNG.to_vec();
        data.resize(len, 0);
        data
    }

    fn policy(max_part_size: u64) -> Arc<UploadPolicy> {
        Arc::new(UploadPolicy {
            max_size: 1024,
            max_part_size,
            max_retries: 2,
            ..UploadPolicy::default()
        })
    }

    fn expect_create(backend: &mut MockStorageBackend) {
        backend
            .expect_create_multipart_upload()
            .times(1)
            .returning(|bucket, key, _| {
                Ok(CreatedUpload {
                    upload_id: "upload-1".into(),
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            });
    }

    #[test]
    fn test_object_key_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let key = object_key("avatars/", &key_timestamp(now), "me.png");
        assert_eq!(key, "avatars/2024-03-09T14:05:07Z-me.png");
    }

    #[tokio::test]
    async fn test_validation_failure_never_reaches_backend() {
        let backend = MockStorageBackend::new();
        let coordinator = TransactionCoordinator::new(Arc::new(backend), "bucket", policy(10));
        let request = UploadRequest::new(IncomingFile::from_bytes("notes.txt", &b"plain words"[..]), "", 0);

        let err = coordinator
            .run(&request, "ts", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_size_mismatch_is_terminal() {
        let backend = MockStorageBackend::new();
        let coordinator = TransactionCoordinator::new(Arc::new(backend), "bucket", policy(10));
        let file = IncomingFile::from_bytes("a.png", png(40)).with_size(50);

        let err = coordinator
            .run(&UploadRequest::new(file, "", 0), "ts", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SizeMismatch { declared: 50, actual: 40, .. }));
    }

    #[tokio::test]
    async fn test_part_failure_aborts_once_and_never_completes() {
        let mut backend = MockStorageBackend::new();
        expect_create(&mut backend);
        backend
            .expect_upload_part()
            .returning(|_, _, _, part_number, _| {
                if part_number == 2 {
                    Err(S3ClientError::ResponseError("slow down".into()))
                } else {
                    Ok(format!("\"etag-{}\"", part_number))
                }
            });
        backend
            .expect_abort_multipart_upload()
            .withf(|_, _, upload_id| upload_id == "upload-1")
            .times(1)
            .returning(|_, _, _| Ok(()));
        backend.expect_complete_multipart_upload().times(0);

        let coordinator = TransactionCoordinator::new(Arc::new(backend), "bucket", policy(10));
        let request = UploadRequest::new(IncomingFile::from_bytes("a.png", png(30)), "", 0);

        let err = coordinator
            .run(&request, "ts", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::RetryExhausted { part_number: 2, attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_abort_failure_wraps_original_cause() {
        let mut backend = MockStorageBackend::new();
        expect_create(&mut backend);
        backend
            .expect_upload_part()
            .returning(|_, _, _, _, _| Err(S3ClientError::ResponseError("part rejected".into())));
        backend
            .expect_abort_multipart_upload()
            .times(1)
            .returning(|_, _, _| Err(S3ClientError::ResponseError("abort denied".into())));

        let coordinator = TransactionCoordinator::new(Arc::new(backend), "bucket", policy(10));
        let request = UploadRequest::new(IncomingFile::from_bytes("a.png", png(30)), "", 0);

        let err = coordinator
            .run(&request, "ts", &CancellationToken::new())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Failed to abort multipart upload upload-1"));
        assert!(message.contains("abort denied"));
        assert!(message.contains("part rejected"));
    }

    #[tokio::test]
    async fn test_complete_receives_ordered_parts() {
        let mut backend = MockStorageBackend::new();
        expect_create(&mut backend);
        backend
            .expect_upload_part()
            .times(3)
            .returning(|_, _, _, part_number, _| Ok(format!("\"etag-{}\"", part_number)));
        backend
            .expect_complete_multipart_upload()
            .withf(|_, _, _, parts| {
                parts.iter().map(|p| p.part_number).collect::<Vec<_>>() == vec![1, 2, 3]
            })
            .times(1)
            .returning(|_, key, _, _| {
                Ok(CompletedUpload {
                    location: format!("https://bucket.example/{}", key),
                    key: key.to_string(),
                })
            });
        backend.expect_abort_multipart_upload().times(0);

        let coordinator = TransactionCoordinator::new(Arc::new(backend), "bucket", policy(10));
        let request = UploadRequest::new(IncomingFile::from_bytes("a.png", png(25)), "p/", 4);

        let result = coordinator
            .run(&request, "2024-01-01T00:00:00Z", &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.order, 4);
        assert_eq!(result.key, "p/2024-01-01T00:00:00Z-a.png");
        assert_eq!(result.message, "File a.png successfully uploaded");
    }

    #[tokio::test]
    async fn test_create_failure_skips_abort() {
        let mut backend = MockStorageBackend::new();
        backend
            .expect_create_multipart_upload()
            .times(1)
            .returning(|_, _, _| Err(S3ClientError::ResponseError("AccessDenied".into())));
        backend.expect_abort_multipart_upload().times(0);

        let coordinator = TransactionCoordinator::new(Arc::new(backend), "bucket", policy(10));
        let request = UploadRequest::new(IncomingFile::from_bytes("a.png", png(30)), "", 0);

        let err = coordinator
            .run(&request, "ts", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
    }

    #[tokio::test]
    async fn test_cancel_during_create_aborts_session() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let mut backend = MockStorageBackend::new();
        backend
            .expect_create_multipart_upload()
            .times(1)
            .returning(move |bucket, key, _| {
                trigger.cancel();
                Ok(CreatedUpload {
                    upload_id: "upload-1".into(),
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            });
        backend.expect_upload_part().times(0);
        backend
            .expect_abort_multipart_upload()
            .withf(|_, _, upload_id| upload_id == "upload-1")
            .times(1)
            .returning(|_, _, _| Ok(()));
        backend.expect_complete_multipart_upload().times(0);

        let coordinator = TransactionCoordinator::new(Arc::new(backend), "bucket", policy(10));
        let request = UploadRequest::new(IncomingFile::from_bytes("a.png", png(30)), "", 0);

        let err = coordinator.run(&request, "ts", &cancel).await.unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_part_size_rejected_before_create() {
        let mut backend = MockStorageBackend::new();
        backend.expect_create_multipart_upload().times(0);

        let coordinator = TransactionCoordinator::new(Arc::new(backend), "bucket", policy(0));
        let request = UploadRequest::new(IncomingFile::from_bytes("a.png", png(30)), "", 0);

        let err = coordinator
            .run(&request, "ts", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidPolicy(_)));
    }

    #[tokio::test]
    async fn test_complete_failure_counts_failed_session() {
        let mut backend = MockStorageBackend::new();
        expect_create(&mut backend);
        backend
            .expect_upload_part()
            .returning(|_, _, _, part_number, _| Ok(format!("\"etag-{}\"", part_number)));
        backend
            .expect_complete_multipart_upload()
            .times(1)
            .returning(|_, _, _, _| Err(S3ClientError::ResponseError("InvalidPart".into())));
        backend.expect_abort_multipart_upload().times(0);

        let failures = metrics::MULTIPART_UPLOADS.with_label_values(&["complete-fails", "failure"]);
        let coordinator = TransactionCoordinator::new(Arc::new(backend), "complete-fails", policy(10));
        let request = UploadRequest::new(IncomingFile::from_bytes("a.png", png(25)), "", 0);

        let err = coordinator
            .run(&request, "ts", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
        assert_eq!(failures.get(), 1.0);
    }
}
