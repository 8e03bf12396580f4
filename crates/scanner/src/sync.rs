//! Sync service
//!
//! Subscribes to the results queue and folds every message into the durable
//! job record, under a per-job lease so concurrent sync processes never
//! interleave a merge.

use crate::config::Config;
use crate::constants::{RESULTS_QUEUE, SYNC_BATCH_SIZE};
use crate::error::{Result, ScannerError};
use crate::merge;
use crate::shutdown::Shutdown;
use model::ResultMessage;
use queue::{Delivery, Queue};
use std::ops::ControlFlow;
use std::sync::Arc;
use storage::JobStore;
use tracing::{debug, error, info, warn};

/// What became of one result message.
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Merged and persisted.
    Applied,
    /// Duplicate or absorbed delivery; nothing to persist.
    Unchanged,
    /// Another holder has the job leased; the bus redelivers.
    LeaseUnavailable,
    /// No record with this id exists.
    UnknownJob,
}

/// Merges one message under the job's lease.
pub async fn apply_message(
    store: &dyn JobStore,
    message: &ResultMessage,
) -> Result<ApplyOutcome> {
    let Some(lease) = store.lock_job(message.id()).await? else {
        return Ok(ApplyOutcome::LeaseUnavailable);
    };

    let outcome = merge_under_lease(store, message).await;
    store.unlock_job(lease).await?;
    outcome
}

async fn merge_under_lease(
    store: &dyn JobStore,
    message: &ResultMessage,
) -> Result<ApplyOutcome> {
    let Some(mut job) = store.get_job(message.id()).await? else {
        return Ok(ApplyOutcome::UnknownJob);
    };

    if merge::apply_result(&mut job, message) {
        store.save_job(&job).await?;
        Ok(ApplyOutcome::Applied)
    } else {
        Ok(ApplyOutcome::Unchanged)
    }
}

pub struct SyncService {
    results: Queue<ResultMessage>,
    store: Arc<dyn JobStore>,
    shutdown: Shutdown,
}

impl SyncService {
    pub async fn new(
        config: &Config,
        store: Arc<dyn JobStore>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let results = Queue::connect(&config.queue, RESULTS_QUEUE, config.max_message_size)
            .await
            .map_err(ScannerError::Queue)?;
        Ok(Self {
            results,
            store,
            shutdown,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!("Sync service started");

        self.results
            .listen(SYNC_BATCH_SIZE, |batch| self.handle_batch(batch))
            .await
            .map_err(ScannerError::Queue)?;

        info!("Sync service stopped");
        Ok(())
    }

    async fn handle_batch(&self, batch: Vec<Delivery<ResultMessage>>) -> ControlFlow<()> {
        for delivery in batch {
            let id = delivery.payload.id().to_string();
            match apply_message(self.store.as_ref(), &delivery.payload).await {
                Ok(ApplyOutcome::Applied) => {
                    debug!("Merged {:?} result for job {}", delivery.payload.status(), id);
                    if let Err(e) = delivery.ack().await {
                        error!("Failed to ack result for job {}: {e}", id);
                    }
                }
                Ok(ApplyOutcome::Unchanged) => {
                    debug!("Dropped duplicate or absorbed result for job {}", id);
                    if let Err(e) = delivery.ack().await {
                        error!("Failed to ack result for job {}: {e}", id);
                    }
                }
                Ok(ApplyOutcome::UnknownJob) => {
                    warn!("Result for unknown job {}, dropping", id);
                    if let Err(e) = delivery.ack().await {
                        error!("Failed to ack result for job {}: {e}", id);
                    }
                }
                Ok(ApplyOutcome::LeaseUnavailable) => {
                    debug!(
                        "Job {} is leased elsewhere, leaving the result for redelivery",
                        id
                    );
                    if let Err(e) = delivery.requeue().await {
                        error!("Failed to requeue result for job {}: {e}", id);
                    }
                }
                Err(e) => {
                    error!("Failed to merge result for job {}: {e}", id);
                    if let Err(e) = delivery.requeue().await {
                        error!("Failed to requeue result for job {}: {e}", id);
                    }
                }
            }
        }

        if self.shutdown.is_requested() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}
