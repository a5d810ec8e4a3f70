//! Kumo Uploadr - multipart uploads to S3-compatible storage
//!
//! Uploads local files concurrently and deletes objects with confirmation.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kumo_uploadr::upload::sort_by_submission_order;
use kumo_uploadr::{config::Config, logging, metrics, IncomingFile, UploadEngine};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Kumo Uploadr - concurrent multipart uploads to S3-compatible storage
#[derive(Parser, Debug)]
#[command(name = "kumo-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files and print one JSON result per file
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Prefix prepended to every object key
        #[arg(short, long, default_value = "")]
        prefix: String,
    },
    /// Delete an object and wait until it is gone
    Delete {
        /// Object key
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    logging::init_subscriber(&config.logging)?;
    info!("Starting Kumo Uploadr v{}", kumo_uploadr::VERSION);
    info!("Loaded configuration from {:?}", args.config);

    let engine = UploadEngine::from_config(&config)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight uploads");
            trigger.cancel();
        }
    });

    let outcome = match args.command {
        Command::Upload { files, prefix } => upload(&engine, files, &prefix, &cancel).await,
        Command::Delete { key } => {
            engine.delete_object_with_cancel(&key, &cancel).await?;
            println!("{}", serde_json::json!({ "key": key, "deleted": true }));
            Ok(())
        }
    };

    if config.metrics.enabled {
        eprint!("{}", metrics::gather_text());
    }

    outcome
}

async fn upload(
    engine: &UploadEngine,
    paths: Vec<PathBuf>,
    prefix: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = IncomingFile::from_path(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        files.push(file);
    }

    let mut results = engine.upload_files_with_cancel(files, prefix, cancel).await;
    sort_by_submission_order(&mut results);

    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, results.len());
    }
    Ok(())
}
