//! Kumo Uploadr Library
//!
//! Concurrent multipart upload engine for S3-compatible object storage.
//!
//! # Features
//!
//! - **Content Validation**: size limits and content-type sniffing from the
//!   payload's leading bytes, never the client's claim
//! - **Multipart Uploads**: fixed-size parts, per-part retry with backoff,
//!   abort on failure
//! - **Batch Isolation**: one task per file; a failing file never affects
//!   its siblings
//! - **Confirmed Deletes**: delete reports success once the object is gone
//!
//! # Example
//!
//! ```no_run
//! use kumo_uploadr::{Config, UploadEngine};
//! use kumo_uploadr::upload::IncomingFile;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let engine = UploadEngine::from_config(&config)?;
//!
//!     let files = vec![
//!         IncomingFile::from_path("a.png").await?,
//!         IncomingFile::from_path("b.jpg").await?,
//!     ];
//!     for result in engine.upload_files(files, "avatars/").await {
//!         println!("{}: {}", result.filename, result.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod s3;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use engine::UploadEngine;
pub use upload::{IncomingFile, UploadError, UploadResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
