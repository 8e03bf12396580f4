//! Status aggregator
//!
//! Quarter-hour counters over the job records: how many jobs were queued,
//! started and finished per bucket, the mean queue-to-start and
//! start-to-finish latencies, and a queue-depth snapshot for the open
//! bucket. Completed buckets are backfilled when the aggregator was away.

use crate::config::Config;
use crate::constants::{JOBS_QUEUE, STATUS_BUCKET_MINUTES};
use crate::error::{Result, ScannerError};
use crate::shutdown::Shutdown;
use chrono::{DateTime, Duration as TimeDelta, Timelike, Utc};
use clock::Clock;
use model::SubJob;
use queue::Queue;
use std::sync::Arc;
use storage::{JobStore, StatusAverages, StatusRecord};
use tracing::{debug, error, info, warn};

/// Start of the bucket containing `time`, aligned to the quarter hour.
pub fn bucket_start(time: DateTime<Utc>) -> DateTime<Utc> {
    let minute = time.minute() - time.minute() % STATUS_BUCKET_MINUTES;
    time.with_minute(minute)
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap()
}

pub fn bucket_width() -> TimeDelta {
    TimeDelta::minutes(i64::from(STATUS_BUCKET_MINUTES))
}

/// Counts one bucket from the job records.
pub async fn compute_bucket(
    store: &dyn JobStore,
    bucket: DateTime<Utc>,
) -> Result<StatusRecord> {
    let from = bucket;
    let to = bucket + bucket_width();
    let jobs = store.jobs_touching(from, to).await?;

    let in_window =
        |stamp: Option<DateTime<Utc>>| stamp.is_some_and(|t| t >= from && t < to);

    let queued = jobs.iter().filter(|job| in_window(job.queued)).count() as u64;
    let started = jobs.iter().filter(|job| in_window(job.started)).count() as u64;
    let finished = jobs.iter().filter(|job| in_window(job.finished)).count() as u64;

    let start_waits: Vec<i64> = jobs
        .iter()
        .filter(|job| in_window(job.started))
        .filter_map(|job| match (job.queued, job.started) {
            (Some(queued), Some(started)) => Some((started - queued).num_milliseconds()),
            _ => None,
        })
        .collect();
    let finish_waits: Vec<i64> = jobs
        .iter()
        .filter(|job| in_window(job.finished))
        .filter_map(|job| match (job.started, job.finished) {
            (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
            _ => None,
        })
        .collect();

    Ok(StatusRecord {
        bucket,
        queued,
        started,
        finished,
        average: StatusAverages {
            start: mean(&start_waits),
            finish: mean(&finish_waits),
        },
        queue_depth: None,
    })
}

/// Recomputes every bucket from the last stored record up to the open one.
/// Completed buckets get final counts; the open bucket is refreshed in
/// place and carries the queue-depth snapshot.
pub async fn refresh_records(
    store: &dyn JobStore,
    now: DateTime<Utc>,
    queue_depth: Option<u64>,
) -> Result<()> {
    let open = bucket_start(now);
    let last = store.last_status_record().await?;
    let mut bucket = match &last {
        Some(record) if record.bucket <= open => record.bucket,
        Some(record) => {
            warn!(
                "Last status record is in the future ({}), recomputing from it",
                record.bucket
            );
            record.bucket
        }
        None => open,
    };

    while bucket <= open {
        let mut record = compute_bucket(store, bucket).await?;
        if bucket == open {
            record.queue_depth = queue_depth;
        } else if let Some(last) = last.as_ref().filter(|r| r.bucket == bucket) {
            // Keep the snapshot this row got back when it was the open
            // bucket.
            record.queue_depth = last.queue_depth;
        }
        store.save_status_record(&record).await?;
        debug!(
            "Status bucket {}: {} queued, {} started, {} finished",
            record.bucket, record.queued, record.started, record.finished
        );
        bucket += bucket_width();
    }

    Ok(())
}

fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<i64>() as f64 / values.len() as f64)
    }
}

pub struct StatusAggregator {
    store: Arc<dyn JobStore>,
    jobs: Queue<SubJob>,
    clock: Clock,
    shutdown: Shutdown,
}

impl StatusAggregator {
    pub async fn new(
        config: &Config,
        store: Arc<dyn JobStore>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let jobs = Queue::connect(&config.queue, JOBS_QUEUE, config.max_message_size)
            .await
            .map_err(ScannerError::Queue)?;
        Ok(Self {
            store,
            jobs,
            clock: Clock::system(),
            shutdown,
        })
    }

    /// Updates on startup, then on every quarter-hour boundary.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Status aggregator started ({} minute buckets)",
            STATUS_BUCKET_MINUTES
        );

        loop {
            if let Err(e) = self.update().await {
                error!("Status update failed: {e}");
            }

            let now = self.clock.now();
            let next = bucket_start(now) + bucket_width();
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.requested() => {
                    info!("Status aggregator stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn update(&self) -> Result<()> {
        let queue_depth = match self.jobs.messages_count().await {
            Ok(depth) => Some(depth),
            Err(e) => {
                warn!("Could not read the jobs queue depth: {e}");
                None
            }
        };
        refresh_records(self.store.as_ref(), self.clock.now(), queue_depth).await
    }
}
