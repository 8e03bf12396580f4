//! Hint status resolution
//!
//! After a scan, every hint declared by the sub-job is resolved against the
//! configuration bundle and the messages the engine produced. Hints the
//! bundle does not mention stay pending; a sibling sub-job owns them.

use model::{
    ConfigBundle, HintMessage, HintResult, HintStatus, JobError, Severity, SubJob,
};

/// Resolution after a successful scan.
///
/// - hints the bundle switches off report `off`;
/// - hints with engine messages report the highest severity among them
///   (`error > warning > pass`) and carry the messages;
/// - hints the bundle mentions without any finding report `pass`;
/// - everything else is left untouched.
pub fn resolve_completed(
    sub_job: &SubJob,
    bundle: &ConfigBundle,
    messages: &[HintMessage],
) -> Vec<HintResult> {
    sub_job
        .hints
        .iter()
        .map(|hint| {
            if bundle.is_off(&hint.name) {
                return HintResult {
                    name: hint.name.clone(),
                    status: HintStatus::Off,
                    messages: Vec::new(),
                };
            }

            let bucket: Vec<HintMessage> = messages
                .iter()
                .filter(|message| message.hint_id == hint.name)
                .cloned()
                .collect();
            if !bucket.is_empty() {
                return HintResult {
                    name: hint.name.clone(),
                    status: bucket_status(&bucket),
                    messages: bucket,
                };
            }

            if bundle.mentions(&hint.name) {
                return HintResult {
                    name: hint.name.clone(),
                    status: HintStatus::Pass,
                    messages: Vec::new(),
                };
            }

            hint.clone()
        })
        .collect()
}

/// Resolution after an engine failure: every configured hint that is not
/// `off` reports the failure as a single synthetic message.
pub fn resolve_failed(
    sub_job: &SubJob,
    bundle: &ConfigBundle,
    error: &JobError,
) -> Vec<HintResult> {
    sub_job
        .hints
        .iter()
        .map(|hint| {
            if bundle.is_off(&hint.name) {
                HintResult {
                    name: hint.name.clone(),
                    status: HintStatus::Off,
                    messages: Vec::new(),
                }
            } else if bundle.mentions(&hint.name) {
                HintResult {
                    name: hint.name.clone(),
                    status: HintStatus::Error,
                    messages: vec![
                        HintMessage::new(hint.name.clone(), error.message.clone())
                            .with_severity(Severity::Error),
                    ],
                }
            } else {
                hint.clone()
            }
        })
        .collect()
}

/// Resolution on deadline expiry. No signal from the engine in time counts
/// as a successful empty scan: every hint still pending passes.
pub fn resolve_timeout(sub_job: &SubJob) -> Vec<HintResult> {
    sub_job
        .hints
        .iter()
        .map(|hint| {
            if hint.is_decided() {
                hint.clone()
            } else {
                HintResult {
                    name: hint.name.clone(),
                    status: HintStatus::Pass,
                    messages: Vec::new(),
                }
            }
        })
        .collect()
}

fn bucket_status(bucket: &[HintMessage]) -> HintStatus {
    match bucket.iter().filter_map(|message| message.severity).max() {
        Some(Severity::Error) => HintStatus::Error,
        Some(Severity::Warning) => HintStatus::Warning,
        _ => HintStatus::Pass,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::PartInfo;
    use serde_json::json;

    fn sub_job(config: serde_json::Value, hints: &[&str]) -> SubJob {
        serde_json::from_value(json!({
            "id": "job-1",
            "url": "https://example.com",
            "config": [config],
            "hints": hints
                .iter()
                .map(|name| json!({ "name": name, "status": "pending" }))
                .collect::<Vec<_>>(),
            "partInfo": { "part": 1, "totalParts": 1 }
        }))
        .unwrap()
    }

    fn status_of<'a>(hints: &'a [HintResult], name: &str) -> &'a HintResult {
        hints.iter().find(|h| h.name == name).unwrap()
    }

    #[test]
    fn mentioned_hint_without_findings_passes() {
        let sub_job = sub_job(
            json!({ "hints": { "content-type": "error" } }),
            &["content-type"],
        );
        let bundle = sub_job.bundle().unwrap();

        let resolved = resolve_completed(&sub_job, bundle, &[]);
        assert_eq!(status_of(&resolved, "content-type").status, HintStatus::Pass);
    }

    #[test]
    fn bucket_severity_decides_the_status() {
        let sub_job = sub_job(
            json!({ "hints": { "axe": "warning", "content-type": "error" } }),
            &["axe", "content-type"],
        );
        let bundle = sub_job.bundle().unwrap();

        let messages = vec![
            HintMessage::new("axe", "contrast too low").with_severity(Severity::Warning),
            HintMessage::new("axe", "missing label").with_severity(Severity::Error),
            HintMessage::new("content-type", "charset missing").with_severity(Severity::Warning),
        ];

        let resolved = resolve_completed(&sub_job, bundle, &messages);
        let axe = status_of(&resolved, "axe");
        assert_eq!(axe.status, HintStatus::Error);
        assert_eq!(axe.messages.len(), 2);
        assert_eq!(
            status_of(&resolved, "content-type").status,
            HintStatus::Warning
        );
    }

    #[test]
    fn messages_without_severity_pass() {
        let sub_job = sub_job(json!({ "hints": { "axe": "warning" } }), &["axe"]);
        let bundle = sub_job.bundle().unwrap();

        let messages = vec![HintMessage::new("axe", "informational note")];
        let resolved = resolve_completed(&sub_job, bundle, &messages);
        assert_eq!(status_of(&resolved, "axe").status, HintStatus::Pass);
        assert_eq!(status_of(&resolved, "axe").messages.len(), 1);
    }

    #[test]
    fn unmentioned_hint_stays_pending() {
        let sub_job = sub_job(
            json!({ "hints": { "axe": "warning" } }),
            &["axe", "manifest-exists"],
        );
        let bundle = sub_job.bundle().unwrap();

        let resolved = resolve_completed(&sub_job, bundle, &[]);
        assert_eq!(
            status_of(&resolved, "manifest-exists").status,
            HintStatus::Pending
        );
    }

    #[test]
    fn engine_failure_marks_configured_hints() {
        let sub_job = sub_job(
            json!({ "hints": {
                "axe": "warning",
                "content-type": "error",
                "disown-opener": ["off", {}]
            } }),
            &["axe", "content-type", "disown-opener", "manifest-exists"],
        );
        let bundle = sub_job.bundle().unwrap();
        let error = JobError::new("Error running webhint");

        let resolved = resolve_failed(&sub_job, bundle, &error);
        assert_eq!(status_of(&resolved, "axe").status, HintStatus::Error);
        assert_eq!(
            status_of(&resolved, "axe").messages[0].message,
            "Error running webhint"
        );
        assert_eq!(
            status_of(&resolved, "content-type").status,
            HintStatus::Error
        );
        assert_eq!(
            status_of(&resolved, "disown-opener").status,
            HintStatus::Off
        );
        assert_eq!(
            status_of(&resolved, "manifest-exists").status,
            HintStatus::Pending
        );
    }

    #[test]
    fn timeout_passes_whatever_is_still_pending() {
        let mut sub_job = sub_job(
            json!({ "hints": { "axe": "warning" } }),
            &["axe", "content-type"],
        );
        sub_job.hints[1].status = HintStatus::Off;

        let resolved = resolve_timeout(&sub_job);
        assert_eq!(status_of(&resolved, "axe").status, HintStatus::Pass);
        assert_eq!(status_of(&resolved, "content-type").status, HintStatus::Off);
    }

    #[test]
    fn off_hint_stays_off_even_with_findings() {
        let sub_job = sub_job(
            json!({ "hints": { "disown-opener": ["off", {}] } }),
            &["disown-opener"],
        );
        let bundle = sub_job.bundle().unwrap();
        let messages = vec![HintMessage::new("disown-opener", "finding")];

        let resolved = resolve_completed(&sub_job, bundle, &messages);
        let hint = status_of(&resolved, "disown-opener");
        assert_eq!(hint.status, HintStatus::Off);
        assert!(hint.messages.is_empty());
    }

    #[test]
    fn part_info_is_untouched_by_resolution() {
        let sub_job = sub_job(json!({ "hints": { "axe": "error" } }), &["axe"]);
        assert_eq!(
            sub_job.part_info,
            PartInfo {
                part: 1,
                total_parts: 1
            }
        );
    }
}
