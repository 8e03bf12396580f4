//! Scan runner — the single-shot child the worker spawns per sub-job
//!
//! The process reads exactly one sub-job as JSON on stdin, runs the engine
//! against its url, and writes exactly one response to stdout. It keeps no
//! state across jobs; isolation from the worker is the whole point of being
//! a separate process.

pub mod engine;

use model::{HintMessage, JobError, RunnerResponse, SubJob};

/// Runs one sub-job to a response. Never panics outward; every failure
/// becomes an `ok: false` response for the worker to report.
pub async fn execute(sub_job: &SubJob) -> RunnerResponse {
    match scan(sub_job).await {
        Ok(messages) => RunnerResponse::Completed(messages),
        Err(error) => RunnerResponse::Failed(error),
    }
}

async fn scan(sub_job: &SubJob) -> Result<Vec<HintMessage>, JobError> {
    sub_job
        .validate()
        .map_err(|e| JobError::new(e.to_string()))?;
    let bundle = sub_job
        .bundle()
        .map_err(|e| JobError::new(e.to_string()))?;

    let engine = engine::from_env(bundle)?;
    let messages = engine.execute(&sub_job.url).await?;
    engine.close().await;
    Ok(messages)
}
