//! Single-part upload with bounded retry

use super::multipart::UploadSession;
use super::retry::BackoffStrategy;
use super::UploadError;
use crate::metrics;
use crate::s3::{CompletedPart, StorageBackend};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Uploads one part, retrying up to `max_attempts` times in total
///
/// Holds no state between calls beyond its configuration.
pub struct PartUploader<'a> {
    backend: &'a dyn StorageBackend,
    max_attempts: u32,
    backoff: &'a BackoffStrategy,
}

impl<'a> PartUploader<'a> {
    pub fn new(backend: &'a dyn StorageBackend, max_attempts: u32, backoff: &'a BackoffStrategy) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Upload `body` as `part_number` of `session`
    ///
    /// Returns as soon as one attempt succeeds. When every attempt fails the
    /// last backend error is returned inside [`UploadError::RetryExhausted`].
    #[tracing::instrument(
        name = "upload.part",
        skip(self, session, body, cancel),
        fields(
            s3.upload_id = %session.upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len()
        ),
        err
    )]
    pub async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> Result<CompletedPart, UploadError> {
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                result = self.backend.upload_part(
                    &session.bucket,
                    &session.key,
                    &session.upload_id,
                    part_number,
                    body.clone(),
                ) => result,
            };

            match result {
                Ok(etag) => return Ok(CompletedPart { part_number, etag }),
                Err(source) if attempt >= self.max_attempts => {
                    return Err(UploadError::RetryExhausted {
                        part_number,
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        part_number = part_number,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Retrying part upload"
                    );
                    metrics::record_part_retry();

                    let delay = self.backoff.delay(attempt);
                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }
}
