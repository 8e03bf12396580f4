//! Durable state behind the sync service and the status aggregator
//!
//! The real deployment keeps job records in an external datastore; the core
//! only ever talks to it through [`JobStore`]. The in-memory implementation
//! backs tests and single-node setups, and owns the per-job lease logic any
//! backend has to provide.

mod lease;
mod memory;
mod record;

pub use lease::{JobLease, LeaseManager};
pub use memory::MemoryStore;
pub use record::{StatusAverages, StatusRecord};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::Job;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("datastore failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Access to the durable job records and the aggregate status rows.
///
/// `lock_job`/`unlock_job` implement the named lease the sync service merges
/// under; the lease TTL must exceed the longest merge a backend can see.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Acquires the lease for `id`, or returns `None` when another holder
    /// has it. Expired leases are reclaimed.
    async fn lock_job(&self, id: &str) -> Result<Option<JobLease>, StoreError>;

    async fn unlock_job(&self, lease: JobLease) -> Result<(), StoreError>;

    /// Jobs whose `queued`, `started` or `finished` stamp falls in
    /// `[from, to)`.
    async fn jobs_touching(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError>;

    async fn last_status_record(&self) -> Result<Option<StatusRecord>, StoreError>;

    /// Inserts or replaces the record keyed by its bucket start.
    async fn save_status_record(&self, record: &StatusRecord) -> Result<(), StoreError>;
}
