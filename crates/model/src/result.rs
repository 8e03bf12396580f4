use crate::job::{HintResult, JobError, JobStatus, PartInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload of the results queue.
///
/// The worker emits exactly one `started` and one terminal message per
/// sub-job; oversized terminals are partitioned into several messages that
/// share `id`, `part_info` and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ResultMessage {
    #[serde(rename = "started", rename_all = "camelCase")]
    Started {
        id: String,
        part_info: PartInfo,
        hints: Vec<HintResult>,
        started: DateTime<Utc>,
        engine_version: String,
    },

    #[serde(rename = "finished", rename_all = "camelCase")]
    Finished {
        id: String,
        part_info: PartInfo,
        hints: Vec<HintResult>,
        finished: DateTime<Utc>,
        /// Diagnostic for scans that finished without an engine signal
        /// (deadline expiry). Not a failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<JobError>,
    },

    #[serde(rename = "error", rename_all = "camelCase")]
    Errored {
        id: String,
        part_info: PartInfo,
        hints: Vec<HintResult>,
        finished: DateTime<Utc>,
        error: JobError,
    },
}

impl ResultMessage {
    pub fn id(&self) -> &str {
        match self {
            ResultMessage::Started { id, .. }
            | ResultMessage::Finished { id, .. }
            | ResultMessage::Errored { id, .. } => id,
        }
    }

    pub fn part_info(&self) -> &PartInfo {
        match self {
            ResultMessage::Started { part_info, .. }
            | ResultMessage::Finished { part_info, .. }
            | ResultMessage::Errored { part_info, .. } => part_info,
        }
    }

    pub fn hints(&self) -> &[HintResult] {
        match self {
            ResultMessage::Started { hints, .. }
            | ResultMessage::Finished { hints, .. }
            | ResultMessage::Errored { hints, .. } => hints,
        }
    }

    pub fn hints_mut(&mut self) -> &mut Vec<HintResult> {
        match self {
            ResultMessage::Started { hints, .. }
            | ResultMessage::Finished { hints, .. }
            | ResultMessage::Errored { hints, .. } => hints,
        }
    }

    /// A copy of this message carrying a different hint subset; everything
    /// else (id, part info, status, stamps, error) is preserved. This is
    /// what oversize partitioning builds its pieces from.
    pub fn with_hints(&self, hints: Vec<HintResult>) -> Self {
        let mut clone = self.clone();
        *clone.hints_mut() = hints;
        clone
    }

    pub fn status(&self) -> JobStatus {
        match self {
            ResultMessage::Started { .. } => JobStatus::Started,
            ResultMessage::Finished { .. } => JobStatus::Finished,
            ResultMessage::Errored { .. } => JobStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{HintStatus, Severity};
    use crate::{HintMessage, HintResult};
    use chrono::TimeZone;
    use serde_json::json;

    fn part() -> PartInfo {
        PartInfo {
            part: 1,
            total_parts: 1,
        }
    }

    #[test]
    fn status_is_the_serde_tag() {
        let message = ResultMessage::Errored {
            id: "job-9".into(),
            part_info: part(),
            hints: vec![],
            finished: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            error: JobError::new("Error running webhint"),
        };

        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["status"], json!("error"));
        assert_eq!(encoded["error"]["message"], json!("Error running webhint"));

        let decoded: ResultMessage = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trip_is_identity() {
        let message = ResultMessage::Finished {
            id: "job-10".into(),
            part_info: part(),
            hints: vec![HintResult {
                name: "axe".into(),
                status: HintStatus::Warning,
                messages: vec![
                    HintMessage::new("axe", "missing alt text").with_severity(Severity::Warning),
                ],
            }],
            finished: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            error: None,
        };

        let bytes = serde_json::to_vec(&message).unwrap();
        let decoded: ResultMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn with_hints_preserves_identity_and_status() {
        let message = ResultMessage::Finished {
            id: "job-11".into(),
            part_info: PartInfo {
                part: 2,
                total_parts: 4,
            },
            hints: vec![HintResult::pending("a"), HintResult::pending("b")],
            finished: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            error: None,
        };

        let piece = message.with_hints(vec![HintResult::pending("b")]);
        assert_eq!(piece.id(), message.id());
        assert_eq!(piece.part_info(), message.part_info());
        assert_eq!(piece.status(), message.status());
        assert_eq!(piece.hints().len(), 1);
    }
}
