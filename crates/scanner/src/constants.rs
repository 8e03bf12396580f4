//! Centralized constants for the scanner services
//!
//! Operational knobs (sizes, retries, timeouts) live here; connection
//! settings come from the environment via `config`.

// =============================================================================
// Queues
// =============================================================================

/// Name of the input queue the workers consume sub-jobs from.
pub const JOBS_QUEUE: &str = "jobs";

/// Name of the output queue the sync service consumes results from.
pub const RESULTS_QUEUE: &str = "results";

/// Default hard cap on a results-queue payload, in bytes. The bus rejects
/// anything larger, so terminal results are partitioned to fit.
/// Overridable with the `MAX_MESSAGE_SIZE` environment variable.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024;

// =============================================================================
// Worker
// =============================================================================

/// Deadline for a sub-job whose record does not carry a `maxRunTime`.
pub const DEFAULT_RUN_TIME_SECS: u64 = 180;

/// Grace between SIGTERM and the hard kill of a runner child.
pub const RUNNER_TERM_GRACE_MS: u64 = 500;

/// Diagnostic message carried by results that hit the deadline.
pub const TIMEOUT_ERROR_MESSAGE: &str = "TIMEOUT";

/// Replacement entry for a hint whose own messages exceed the bus limit.
pub const TOO_MANY_ERRORS_MESSAGE: &str =
    "This hint has too many errors, please use webhint locally for more details";

// =============================================================================
// Queue send retries
// =============================================================================

/// Total attempts for a transient send failure before the result is
/// abandoned.
pub const SEND_RETRY_ATTEMPTS: usize = 3;

/// Base delay of the exponential send backoff (in milliseconds).
pub const SEND_RETRY_BASE_MS: u64 = 250;

/// Cap on the send backoff regardless of attempt count (in milliseconds).
pub const SEND_RETRY_CAP_MS: u64 = 2_000;

// =============================================================================
// Sync
// =============================================================================

/// Result messages pulled per batch by the sync service.
pub const SYNC_BATCH_SIZE: usize = 16;

/// TTL of the per-job lease the sync service merges under. Must exceed the
/// longest merge a backend can see.
pub const JOB_LEASE_TTL_SECS: u64 = 30;

// =============================================================================
// Status aggregator
// =============================================================================

/// Width of one aggregation bucket, in minutes. Buckets align to
/// quarter-hour boundaries.
pub const STATUS_BUCKET_MINUTES: u32 = 15;
