//! Common Test Infrastructure
//!
//! A scripted in-memory [`StorageBackend`] that records every call and fails
//! on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use kumo_uploadr::s3::{CompletedPart, CompletedUpload, CreatedUpload, S3ClientError, StorageBackend};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

pub const MB: usize = 1024 * 1024;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF\xE0";

/// PNG-sniffable payload of exactly `len` bytes
pub fn png_bytes(len: usize) -> Vec<u8> {
    let mut data = PNG_MAGIC.to_vec();
    data.resize(len, 0xAB);
    data
}

/// JPEG-sniffable payload of exactly `len` bytes
pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut data = JPEG_MAGIC.to_vec();
    data.resize(len, 0x11);
    data
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartCall {
    pub key: String,
    pub upload_id: String,
    pub part_number: u32,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteCall {
    pub key: String,
    pub upload_id: String,
    pub part_numbers: Vec<u32>,
}

#[derive(Debug, Default)]
struct Calls {
    creates: Vec<(String, String)>,
    parts: Vec<PartCall>,
    completes: Vec<CompleteCall>,
    aborts: Vec<String>,
    deletes: Vec<String>,
    heads: usize,
    objects: HashSet<String>,
    next_upload: usize,
    /// upload id → key
    sessions: HashMap<String, String>,
}

/// Scripted storage backend
#[derive(Debug, Default)]
pub struct FakeBackend {
    calls: Mutex<Calls>,
    /// (filename, part number) pairs that always fail
    failing_parts: HashSet<(String, u32)>,
    fail_create: bool,
    fail_complete: bool,
    fail_abort: bool,
    fail_delete: bool,
    /// Objects that never disappear after a delete
    sticky: bool,
    part_delay: Option<Duration>,
    create_delay: Option<Duration>,
    /// Filenames whose part uploads panic
    panicking: HashSet<String>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_part(mut self, filename: &str, part_number: u32) -> Self {
        self.failing_parts.insert((filename.to_string(), part_number));
        self
    }

    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub fn fail_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub fn fail_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn sticky_objects(mut self) -> Self {
        self.sticky = true;
        self
    }

    pub fn part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn panic_on_part(mut self, filename: &str) -> Self {
        self.panicking.insert(filename.to_string());
        self
    }

    pub fn with_object(self, key: &str) -> Self {
        self.calls.lock().unwrap().objects.insert(key.to_string());
        self
    }

    pub fn create_count(&self) -> usize {
        self.calls.lock().unwrap().creates.len()
    }

    pub fn created_keys(&self) -> Vec<String> {
        self.calls.lock().unwrap().creates.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn content_types(&self) -> Vec<String> {
        self.calls.lock().unwrap().creates.iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn parts(&self) -> Vec<PartCall> {
        self.calls.lock().unwrap().parts.clone()
    }

    pub fn completes(&self) -> Vec<CompleteCall> {
        self.calls.lock().unwrap().completes.clone()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.calls.lock().unwrap().aborts.clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls.lock().unwrap().deletes.clone()
    }

    pub fn head_count(&self) -> usize {
        self.calls.lock().unwrap().heads
    }

    /// Upload ids created but neither completed nor aborted
    pub fn open_sessions(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.calls.lock().unwrap().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_object(&self, key: &str) -> bool {
        self.calls.lock().unwrap().objects.contains(key)
    }

    fn part_fails(&self, key: &str, part_number: u32) -> bool {
        self.failing_parts
            .iter()
            .any(|(filename, n)| *n == part_number && key.ends_with(filename.as_str()))
    }
}

fn injected(operation: &'static str) -> S3ClientError {
    S3ClientError::RequestError {
        operation,
        message: format!("InternalError: injected {} failure", operation),
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<CreatedUpload, S3ClientError> {
        let upload_id = {
            let mut calls = self.calls.lock().unwrap();
            calls.creates.push((key.to_string(), content_type.to_string()));
            if self.fail_create {
                return Err(injected("CreateMultipartUpload"));
            }

            calls.next_upload += 1;
            let upload_id = format!("upload-{}", calls.next_upload);
            calls.sessions.insert(upload_id.clone(), key.to_string());
            upload_id
        };

        // The session already exists server-side while the response is in flight
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        Ok(CreatedUpload {
            upload_id,
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, S3ClientError> {
        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }

        if self.panicking.iter().any(|filename| key.ends_with(filename.as_str())) {
            panic!("part upload for {} blew up", key);
        }

        self.calls.lock().unwrap().parts.push(PartCall {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            part_number,
            len: body.len(),
        });

        if self.part_fails(key, part_number) {
            return Err(injected("UploadPart"));
        }
        Ok(format!("\"etag-{}-{}\"", upload_id, part_number))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<CompletedUpload, S3ClientError> {
        let mut calls = self.calls.lock().unwrap();
        calls.completes.push(CompleteCall {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });
        if self.fail_complete {
            return Err(injected("CompleteMultipartUpload"));
        }

        calls.sessions.remove(upload_id);
        calls.objects.insert(key.to_string());
        Ok(CompletedUpload {
            location: format!("https://{}.storage.test/{}", bucket, key),
            key: key.to_string(),
        })
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), S3ClientError> {
        let mut calls = self.calls.lock().unwrap();
        calls.aborts.push(upload_id.to_string());
        if self.fail_abort {
            return Err(injected("AbortMultipartUpload"));
        }
        calls.sessions.remove(upload_id);
        Ok(())
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<(), S3ClientError> {
        let mut calls = self.calls.lock().unwrap();
        calls.deletes.push(key.to_string());
        if self.fail_delete {
            return Err(injected("DeleteObject"));
        }
        if !self.sticky {
            calls.objects.remove(key);
        }
        Ok(())
    }

    async fn object_exists(&self, _bucket: &str, key: &str) -> Result<bool, S3ClientError> {
        let mut calls = self.calls.lock().unwrap();
        calls.heads += 1;
        Ok(calls.objects.contains(key))
    }
}
