//! Tracing initialization with console or rotating-file output.
//!
//! ## Environment variables
//!
//! - `LOG_DESTINATION`: "console" or "file" (default: "console")
//! - `LOG_DIR`: directory for log files (default: "./logs"), file mode only
//! - `LOG_FILE_PREFIX`: log file name prefix (default: "scanner"), file mode only

use anyhow::Result;
use std::env;
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_logging() -> Result<()> {
    let destination = env::var("LOG_DESTINATION").unwrap_or_else(|_| "console".to_string());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    match destination.to_lowercase().as_str() {
        "file" => {
            let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
            let prefix = env::var("LOG_FILE_PREFIX").unwrap_or_else(|_| "scanner".to_string());

            std::fs::create_dir_all(&log_dir).map_err(|e| {
                anyhow::anyhow!("failed to create log directory '{}': {}", log_dir, e)
            })?;

            let file_appender = rolling::daily(&log_dir, &prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

            info!(
                "Logging to daily rotating files: {}/{}.<YYYY-MM-DD>",
                log_dir, prefix
            );

            // The guard owns the background writer thread; keep it for the
            // lifetime of the process.
            std::mem::forget(guard);
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stdout)
                        .with_ansi(true)
                        .with_target(false),
                )
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}
