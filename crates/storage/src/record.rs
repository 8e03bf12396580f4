use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean latencies, in milliseconds, over the jobs whose corresponding event
/// landed in the bucket. `None` when no job contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusAverages {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<f64>,
}

/// One quarter-hour aggregation row, keyed by the bucket start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub bucket: DateTime<Utc>,
    pub queued: u64,
    pub started: u64,
    pub finished: u64,
    #[serde(default)]
    pub average: StatusAverages,
    /// Depth of the jobs queue at the time the open bucket was refreshed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u64>,
}
