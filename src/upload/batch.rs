//! Concurrent batch uploads
//!
//! Every file gets its own task and its own transaction. A failing file never
//! affects its siblings; each outcome comes back as an [`UploadResult`].

use super::multipart::{key_timestamp, TransactionCoordinator};
use super::{UploadPolicy, UploadRequest, UploadResult};
use crate::s3::ClientHandle;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fans a batch out to one task per file and gathers the results
#[derive(Clone)]
pub struct BatchOrchestrator {
    coordinator: TransactionCoordinator,
}

impl BatchOrchestrator {
    pub fn new(handle: ClientHandle, bucket: impl Into<String>, policy: Arc<UploadPolicy>) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(handle, bucket, policy),
        }
    }

    /// Upload every request, returning one result per request
    ///
    /// Results arrive in completion order. Use [`sort_by_submission_order`]
    /// to restore the order of `requests`.
    #[tracing::instrument(name = "upload.batch", skip_all, fields(files = requests.len()))]
    pub async fn upload_many(
        &self,
        requests: Vec<UploadRequest>,
        cancel: &CancellationToken,
    ) -> Vec<UploadResult> {
        let timestamp = key_timestamp(Utc::now());

        if requests.len() <= 1 {
            let mut results = Vec::with_capacity(1);
            for request in requests {
                results.push(run_one(&self.coordinator, &request, &timestamp, cancel).await);
            }
            return results;
        }

        let (tx, mut rx) = mpsc::channel(requests.len());
        let mut tasks = Vec::with_capacity(requests.len());
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let coordinator = self.coordinator.clone();
            let timestamp = timestamp.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            let filename = request.file.filename.clone();
            let order = request.order;

            let handle = tokio::spawn(async move {
                let result = run_one(&coordinator, &request, &timestamp, &cancel).await;
                // Capacity equals the number of tasks, so this never waits
                let _ = tx.send(result).await;
            });
            tasks.push((filename, order));
            handles.push(handle);
        }
        drop(tx);

        let joined = join_all(handles).await;

        let mut results = Vec::with_capacity(tasks.len());
        for ((filename, order), outcome) in tasks.into_iter().zip(joined) {
            if let Err(e) = outcome {
                tracing::error!(filename = %filename, error = %e, "Upload task panicked");
                results.push(UploadResult {
                    filename: filename.clone(),
                    success: false,
                    location: String::new(),
                    key: String::new(),
                    message: format!("{}: upload task failed: {}", filename, e),
                    order,
                });
            }
        }

        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(total = results.len(), failed = failed, "Batch finished");

        results
    }
}

async fn run_one(
    coordinator: &TransactionCoordinator,
    request: &UploadRequest,
    timestamp: &str,
    cancel: &CancellationToken,
) -> UploadResult {
    match coordinator.run(request, timestamp, cancel).await {
        Ok(result) => result,
        Err(e) => UploadResult::failure(&request.file.filename, request.order, &e),
    }
}

/// Restore submission order after a batch
pub fn sort_by_submission_order(results: &mut [UploadResult]) {
    results.sort_by_key(|r| r.order);
}
