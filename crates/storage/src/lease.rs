use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A held lease on one job record. Returned by `lock_job` and consumed by
/// `unlock_job`; a lease that outlives its TTL is silently reclaimed.
#[derive(Debug)]
pub struct JobLease {
    pub job_id: String,
    token: u64,
}

struct LeaseEntry {
    token: u64,
    acquired_at: Instant,
}

/// Named leases with a TTL, keyed by job id.
///
/// Holders that die without releasing are covered by expiry: the next
/// acquisition attempt sweeps every lease older than the TTL.
pub struct LeaseManager {
    leases: Mutex<HashMap<String, LeaseEntry>>,
    ttl: Duration,
    next_token: AtomicU64,
}

impl LeaseManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            ttl,
            next_token: AtomicU64::new(1),
        }
    }

    pub fn try_acquire(&self, job_id: &str) -> Option<JobLease> {
        let mut leases = self.leases.lock();
        let now = Instant::now();
        self.sweep_expired(&mut leases, now);

        use std::collections::hash_map::Entry;
        match leases.entry(job_id.to_string()) {
            Entry::Occupied(entry) => {
                debug!(
                    "Job {} is already leased (held for {:?})",
                    job_id,
                    now.duration_since(entry.get().acquired_at)
                );
                None
            }
            Entry::Vacant(entry) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                entry.insert(LeaseEntry {
                    token,
                    acquired_at: now,
                });
                debug!("Acquired lease for job {}", job_id);
                Some(JobLease {
                    job_id: job_id.to_string(),
                    token,
                })
            }
        }
    }

    pub fn release(&self, lease: &JobLease) {
        let mut leases = self.leases.lock();
        match leases.get(&lease.job_id) {
            Some(entry) if entry.token == lease.token => {
                leases.remove(&lease.job_id);
                trace!("Released lease for job {}", lease.job_id);
            }
            Some(_) => {
                // The lease expired and somebody else holds a fresh one.
                trace!(
                    "Stale release for job {} ignored (lease was reclaimed)",
                    lease.job_id
                );
            }
            None => {
                trace!("Release for job {} without a held lease", lease.job_id);
            }
        }
    }

    pub fn is_locked(&self, job_id: &str) -> bool {
        let mut leases = self.leases.lock();
        self.sweep_expired(&mut leases, Instant::now());
        leases.contains_key(job_id)
    }

    fn sweep_expired(&self, leases: &mut HashMap<String, LeaseEntry>, now: Instant) {
        leases.retain(|job_id, entry| {
            let keep = now.duration_since(entry.acquired_at) < self.ttl;
            if !keep {
                debug!(
                    "Reclaiming expired lease for job {} (held for {:?}, ttl {:?})",
                    job_id,
                    now.duration_since(entry.acquired_at),
                    self.ttl
                );
            }
            keep
        });
    }
}
