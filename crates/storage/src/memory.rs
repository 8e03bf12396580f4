use crate::lease::{JobLease, LeaseManager};
use crate::record::StatusRecord;
use crate::{JobStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::Job;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// In-memory [`JobStore`]. Backs tests and single-node deployments; the
/// lease semantics match what a datastore-backed implementation provides.
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, Job>>,
    status: RwLock<BTreeMap<DateTime<Utc>, StatusRecord>>,
    leases: LeaseManager,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lease_ttl(DEFAULT_LEASE_TTL)
    }

    pub fn with_lease_ttl(ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            status: RwLock::new(BTreeMap::new()),
            leases: LeaseManager::new(ttl),
        }
    }
}

impl MemoryStore {
    /// All aggregation rows in bucket order. Diagnostic surface; the trait
    /// only ever needs the latest row.
    pub async fn status_records(&self) -> Vec<StatusRecord> {
        self.status.read().await.values().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs
            .write()
            .await
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn lock_job(&self, id: &str) -> Result<Option<JobLease>, StoreError> {
        Ok(self.leases.try_acquire(id))
    }

    async fn unlock_job(&self, lease: JobLease) -> Result<(), StoreError> {
        self.leases.release(&lease);
        Ok(())
    }

    async fn jobs_touching(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let in_window = |stamp: &Option<DateTime<Utc>>| {
            stamp.map_or(false, |t| t >= from && t < to)
        };
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| {
                in_window(&job.queued) || in_window(&job.started) || in_window(&job.finished)
            })
            .cloned()
            .collect())
    }

    async fn last_status_record(&self) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self
            .status
            .read()
            .await
            .values()
            .next_back()
            .cloned())
    }

    async fn save_status_record(&self, record: &StatusRecord) -> Result<(), StoreError> {
        self.status
            .write()
            .await
            .insert(record.bucket, record.clone());
        Ok(())
    }
}
