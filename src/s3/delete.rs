//! Object deletion with absence confirmation
//!
//! A delete is only reported as successful once HeadObject stops finding the
//! object.

use crate::config::DeleteConfig;
use crate::metrics;
use crate::s3::StorageBackend;
use crate::upload::UploadError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long to wait for a deleted object to disappear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteWait {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DeleteWait {
    fn default() -> Self {
        Self::from(&DeleteConfig::default())
    }
}

impl From<&DeleteConfig> for DeleteWait {
    fn from(config: &DeleteConfig) -> Self {
        Self {
            timeout: config.wait_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Delete `key` and wait until the backend confirms it is gone
#[tracing::instrument(
    name = "upload.delete",
    skip(backend, wait, cancel),
    fields(s3.bucket = %bucket, s3.key = %key),
    err
)]
pub async fn delete_object(
    backend: &dyn StorageBackend,
    bucket: &str,
    key: &str,
    wait: &DeleteWait,
    cancel: &CancellationToken,
) -> Result<(), UploadError> {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err("cancelled".to_string()),
        result = delete_and_confirm(backend, bucket, key, wait) => result,
    };

    match result {
        Ok(()) => {
            metrics::record_delete(true);
            tracing::info!("Object deleted");
            Ok(())
        }
        Err(reason) => {
            metrics::record_delete(false);
            metrics::record_error("delete");
            Err(UploadError::DeleteError {
                key: key.to_string(),
                reason,
            })
        }
    }
}

async fn delete_and_confirm(
    backend: &dyn StorageBackend,
    bucket: &str,
    key: &str,
    wait: &DeleteWait,
) -> Result<(), String> {
    backend
        .delete_object(bucket, key)
        .await
        .map_err(|e| e.to_string())?;

    let poll = async {
        loop {
            match backend.object_exists(bucket, key).await {
                Ok(false) => return Ok(()),
                Ok(true) => {
                    tracing::debug!("Object still present, polling again");
                    tokio::time::sleep(wait.poll_interval).await;
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    };

    tokio::time::timeout(wait.timeout, poll)
        .await
        .map_err(|_| format!("object still present after {:?}", wait.timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::{MockStorageBackend, S3ClientError};
    use mockall::Sequence;

    fn wait() -> DeleteWait {
        DeleteWait {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_object_disappears() {
        let mut backend = MockStorageBackend::new();
        let mut seq = Sequence::new();
        backend
            .expect_delete_object()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        backend
            .expect_object_exists()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(true));
        backend
            .expect_object_exists()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(false));

        delete_object(&backend, "bucket", "key", &wait(), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout_is_delete_error() {
        let mut backend = MockStorageBackend::new();
        backend.expect_delete_object().times(1).returning(|_, _| Ok(()));
        backend.expect_object_exists().returning(|_, _| Ok(true));

        let err = delete_object(&backend, "bucket", "key", &wait(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            UploadError::DeleteError { key, reason } => {
                assert_eq!(key, "key");
                assert!(reason.contains("still present"));
            }
            other => panic!("expected DeleteError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_failure_skips_polling() {
        let mut backend = MockStorageBackend::new();
        backend
            .expect_delete_object()
            .times(1)
            .returning(|_, _| Err(S3ClientError::ResponseError("AccessDenied".into())));
        backend.expect_object_exists().times(0);

        let err = delete_object(&backend, "bucket", "key", &wait(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("AccessDenied"));
    }

    #[tokio::test]
    async fn test_cancelled_delete() {
        let mut backend = MockStorageBackend::new();
        backend.expect_delete_object().times(0);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = delete_object(&backend, "bucket", "key", &wait(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::DeleteError { ref reason, .. } if reason == "cancelled"));
    }
}
