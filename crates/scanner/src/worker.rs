//! Worker service
//!
//! Consumes sub-jobs from the jobs queue and guarantees, per sub-job,
//! exactly one `started` result followed by exactly one terminal result on
//! the results queue (modulo oversize partitioning), inside the sub-job's
//! deadline. The scan itself happens in a child process; the worker only
//! supervises it.

use crate::chunk;
use crate::config::Config;
use crate::constants::{
    DEFAULT_RUN_TIME_SECS, JOBS_QUEUE, RESULTS_QUEUE, SEND_RETRY_ATTEMPTS, SEND_RETRY_BASE_MS,
    SEND_RETRY_CAP_MS, TIMEOUT_ERROR_MESSAGE,
};
use crate::error::{Result, ScannerError};
use crate::hints;
use crate::runner::{RunOutcome, RunnerCommand, RunnerHandle};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clock::Clock;
use model::{ConfigBundle, HintResult, JobError, ResultMessage, SubJob};
use queue::{Delivery, Queue, SendError};
use rand::Rng;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Where results go. The results queue in production; tests substitute a
/// recorder.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn send(&self, message: &ResultMessage) -> std::result::Result<(), SendError>;
}

#[async_trait]
impl ResultSink for Queue<ResultMessage> {
    async fn send(&self, message: &ResultMessage) -> std::result::Result<(), SendError> {
        Queue::send(self, message).await
    }
}

/// Settings of one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub runner: RunnerCommand,
    pub engine_version: String,
    pub max_message_size: usize,
    /// Sub-jobs in flight at once. Fleet parallelism comes from running
    /// more worker processes, so this stays at 1 unless a deployment knows
    /// better.
    pub concurrency: usize,
}

pub struct WorkerService {
    jobs: Queue<SubJob>,
    results: Arc<Queue<ResultMessage>>,
    clock: Arc<Clock>,
    config: WorkerConfig,
    shutdown: Shutdown,
}

impl WorkerService {
    pub async fn new(
        config: &Config,
        worker_config: WorkerConfig,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let jobs = Queue::connect(&config.queue, JOBS_QUEUE, config.max_message_size)
            .await
            .map_err(ScannerError::Queue)?;
        let results = Queue::connect(&config.queue, RESULTS_QUEUE, config.max_message_size)
            .await
            .map_err(ScannerError::Queue)?;
        let clock = Arc::new(Clock::from_env().await);

        Ok(Self {
            jobs,
            results: Arc::new(results),
            clock,
            config: worker_config,
            shutdown,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Worker started (runner: {}, engine {})",
            self.config.runner, self.config.engine_version
        );

        self.jobs
            .listen(self.config.concurrency.max(1), |batch| {
                self.handle_batch(batch)
            })
            .await
            .map_err(ScannerError::Queue)?;

        info!("Worker stopped");
        Ok(())
    }

    async fn handle_batch(&self, batch: Vec<Delivery<SubJob>>) -> ControlFlow<()> {
        for delivery in batch {
            process_sub_job(
                &delivery.payload,
                self.results.as_ref(),
                &self.clock,
                &self.config,
                &self.shutdown,
            )
            .await;

            // Ack after processing: redelivery of a half-processed sub-job
            // is harmless because the sync merge is idempotent.
            if let Err(e) = delivery.ack().await {
                error!("Failed to ack sub-job: {e}");
            }
        }

        if self.shutdown.is_requested() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

/// Runs one sub-job start to finish: `started` result, supervised child,
/// terminal result.
pub async fn process_sub_job(
    sub_job: &SubJob,
    sink: &dyn ResultSink,
    clock: &Clock,
    config: &WorkerConfig,
    shutdown: &Shutdown,
) {
    info!(
        "Processing sub-job {} (part {}/{})",
        sub_job.id, sub_job.part_info.part, sub_job.part_info.total_parts
    );

    let started = ResultMessage::Started {
        id: sub_job.id.clone(),
        part_info: sub_job.part_info,
        hints: sub_job
            .hints
            .iter()
            .map(|hint| HintResult::pending(hint.name.clone()))
            .collect(),
        started: clock.now(),
        engine_version: config.engine_version.clone(),
    };
    if let Err(e) = send_with_retry(sink, &started).await {
        error!(
            "Dropping sub-job {}: could not report start: {e}",
            sub_job.id
        );
        return;
    }

    let deadline = Duration::from_secs(if sub_job.max_run_time == 0 {
        DEFAULT_RUN_TIME_SECS
    } else {
        sub_job.max_run_time
    });

    let outcome = match sub_job.bundle() {
        Ok(_) => match RunnerHandle::spawn(&config.runner, sub_job).await {
            Ok(handle) => {
                debug!("Runner spawned for sub-job {}", sub_job.id);
                handle.wait(deadline, shutdown).await
            }
            Err(error) => {
                error!(
                    "Failed to spawn the runner for sub-job {}: {}",
                    sub_job.id, error.message
                );
                RunOutcome::Failed(error)
            }
        },
        Err(e) => RunOutcome::Failed(JobError::new(e.to_string())),
    };

    let terminal = build_terminal(sub_job, outcome, clock.now());
    emit_terminal(sink, terminal, config.max_message_size).await;
}

fn build_terminal(
    sub_job: &SubJob,
    outcome: RunOutcome,
    finished: DateTime<Utc>,
) -> ResultMessage {
    // A sub-job without a valid bundle was already routed to the failure
    // path; the empty bundle keeps resolution well-defined there.
    let fallback = ConfigBundle::default();
    let bundle = sub_job.bundle().unwrap_or(&fallback);

    match outcome {
        RunOutcome::Completed(messages) => ResultMessage::Finished {
            id: sub_job.id.clone(),
            part_info: sub_job.part_info,
            hints: hints::resolve_completed(sub_job, bundle, &messages),
            finished,
            error: None,
        },
        RunOutcome::Failed(error) => ResultMessage::Errored {
            id: sub_job.id.clone(),
            part_info: sub_job.part_info,
            hints: hints::resolve_failed(sub_job, bundle, &error),
            finished,
            error,
        },
        // No signal from the engine in time is a successful empty scan with
        // a surfaced diagnostic, not a failure.
        RunOutcome::TimedOut => ResultMessage::Finished {
            id: sub_job.id.clone(),
            part_info: sub_job.part_info,
            hints: hints::resolve_timeout(sub_job),
            finished,
            error: Some(JobError::new(TIMEOUT_ERROR_MESSAGE)),
        },
        RunOutcome::Canceled => {
            let error = JobError::new("worker shut down before the scan finished");
            ResultMessage::Errored {
                id: sub_job.id.clone(),
                part_info: sub_job.part_info,
                hints: hints::resolve_failed(sub_job, bundle, &error),
                finished,
                error,
            }
        }
    }
}

/// Emits a terminal result, partitioning for size and recovering from
/// bus-side oversize rejections with a single collapse-and-resend pass.
async fn emit_terminal(sink: &dyn ResultSink, terminal: ResultMessage, limit: usize) {
    let pieces = chunk::partition(&terminal, limit);
    if pieces.len() > 1 {
        info!(
            "Terminal result for {} split into {} messages",
            terminal.id(),
            pieces.len()
        );
    }

    for mut piece in pieces {
        match send_with_retry(sink, &piece).await {
            Ok(()) => {}
            Err(SendError::Oversize { size, limit }) => {
                warn!(
                    "Bus rejected a {size}-byte result for {} (limit {limit}), \
                     collapsing the largest hint and resending",
                    piece.id()
                );
                if chunk::collapse_largest(&mut piece) {
                    // One pass only: a failure after collapsing abandons the
                    // result and leaves the orchestrator timeout to close
                    // the job.
                    if let Err(e) = send_with_retry(sink, &piece).await {
                        error!(
                            "Abandoning result for {} after the oversize retry: {e}",
                            piece.id()
                        );
                    }
                } else {
                    error!(
                        "Result for {} is oversized with no hint messages to collapse",
                        piece.id()
                    );
                }
            }
            Err(e) => {
                error!("Abandoning result for {}: {e}", piece.id());
            }
        }
    }
}

async fn send_with_retry(
    sink: &dyn ResultSink,
    message: &ResultMessage,
) -> std::result::Result<(), SendError> {
    let mut attempt = 0;
    loop {
        match sink.send(message).await {
            Ok(()) => return Ok(()),
            Err(SendError::Transient(e)) => {
                attempt += 1;
                if attempt >= SEND_RETRY_ATTEMPTS {
                    return Err(SendError::Transient(e));
                }
                let backoff =
                    (SEND_RETRY_BASE_MS << (attempt - 1)).min(SEND_RETRY_CAP_MS);
                let jitter = rand::thread_rng().gen_range(0..=backoff / 4);
                warn!(
                    "Transient send failure for {} (attempt {attempt}/{SEND_RETRY_ATTEMPTS}), \
                     retrying in {} ms: {e}",
                    message.id(),
                    backoff + jitter
                );
                sleep(Duration::from_millis(backoff + jitter)).await;
            }
            Err(other) => return Err(other),
        }
    }
}
