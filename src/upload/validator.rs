//! Upload validation
//!
//! Checks a file's declared size and sniffed content type against the
//! [`UploadPolicy`]. The client-declared content type plays no part.

use super::sniff::detect_content_type;
use super::{IncomingFile, UploadError, UploadPolicy, SNIFF_LEN};

const MEGABYTE: u64 = 1024 * 1024;

/// Policy-bound validator
#[derive(Debug, Clone)]
pub struct Validator<'a> {
    policy: &'a UploadPolicy,
}

impl<'a> Validator<'a> {
    pub fn new(policy: &'a UploadPolicy) -> Self {
        Self { policy }
    }

    /// Validate metadata plus the leading bytes of the payload
    ///
    /// Returns the sniffed content type on success. Zero-length payloads are
    /// rejected outright since they would produce no parts.
    pub fn validate(&self, filename: &str, size: u64, head: &[u8]) -> Result<&'static str, UploadError> {
        self.policy.validate()?;

        if size == 0 {
            return Err(UploadError::EmptyFile {
                filename: filename.to_string(),
            });
        }

        if size > self.policy.max_size {
            return Err(UploadError::FileTooLarge {
                filename: filename.to_string(),
                size,
                limit: size_limit(self.policy.max_size),
            });
        }

        let content_type = detect_content_type(head);
        if !self.policy.allowed_types.iter().any(|t| t == content_type) {
            return Err(UploadError::UnsupportedType {
                filename: filename.to_string(),
                content_type: content_type.to_string(),
            });
        }

        Ok(content_type)
    }

    /// Read the head of `file` and validate it
    pub async fn validate_file(&self, file: &IncomingFile) -> Result<&'static str, UploadError> {
        let head = file.read_head(SNIFF_LEN).await?;
        let content_type = self.validate(&file.filename, file.size, &head)?;

        if let Some(ref declared) = file.content_type {
            if declared != content_type {
                tracing::debug!(
                    filename = %file.filename,
                    declared = %declared,
                    sniffed = content_type,
                    "Declared content type differs from sniffed type"
                );
            }
        }

        Ok(content_type)
    }
}

/// Whole megabytes when exact, bytes otherwise
fn size_limit(max_size: u64) -> String {
    if max_size >= MEGABYTE && max_size % MEGABYTE == 0 {
        format!("{} MB", max_size / MEGABYTE)
    } else {
        format!("{} bytes", max_size)
    }
}
