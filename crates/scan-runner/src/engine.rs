//! The engine boundary.
//!
//! The engine is a black box: it consumes a configuration bundle plus a url
//! and emits hint messages. The production engine is an external executable
//! named by `ENGINE_BIN`, spoken to over stdin/stdout JSON.

use async_trait::async_trait;
use model::{ConfigBundle, HintMessage, JobError};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const ENGINE_BIN_ENV: &str = "ENGINE_BIN";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no scan engine configured (set ENGINE_BIN)")]
    NotConfigured,

    #[error("failed to launch scan engine: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("scan engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("scan engine produced invalid output: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    #[error("scan engine exited with {status}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },
}

impl From<EngineError> for JobError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Failed { status, stderr } if !stderr.trim().is_empty() => {
                JobError::with_stack(format!("scan engine exited with {status}"), stderr)
            }
            other => JobError::new(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn execute(&self, url: &str) -> Result<Vec<HintMessage>, EngineError>;

    /// Cleanup hook; the default engine has nothing to tear down beyond its
    /// child process, which dies with the handle.
    async fn close(&self) {}
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    url: &'a str,
    config: &'a ConfigBundle,
}

/// The configured engine executable. Receives `{url, config}` on stdin and
/// must print a JSON array of hint messages on stdout.
pub struct ExternalEngine {
    program: PathBuf,
    bundle: ConfigBundle,
}

impl ExternalEngine {
    pub fn new(program: PathBuf, bundle: ConfigBundle) -> Self {
        Self { program, bundle }
    }
}

#[async_trait]
impl Engine for ExternalEngine {
    async fn execute(&self, url: &str) -> Result<Vec<HintMessage>, EngineError> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::Spawn)?;

        let request = serde_json::to_vec(&EngineRequest {
            url,
            config: &self.bundle,
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let messages: Vec<HintMessage> = serde_json::from_slice(&output.stdout)?;
        Ok(messages)
    }
}

/// Builds the engine for a bundle from the environment.
pub fn from_env(bundle: &ConfigBundle) -> Result<Box<dyn Engine>, EngineError> {
    match env::var(ENGINE_BIN_ENV) {
        Ok(program) if !program.is_empty() => Ok(Box::new(ExternalEngine::new(
            PathBuf::from(program),
            bundle.clone(),
        ))),
        _ => Err(EngineError::NotConfigured),
    }
}
