use crate::job::{HintMessage, JobError};
use serde::{Deserialize, Serialize};

/// The single response a scan-runner child writes back over IPC.
///
/// On the wire this is `{ok: true, messages: [...]}` or
/// `{ok: false, error: ...}`, matching what engines and operators expect to
/// see in captured runner output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RunnerResponseWire", into = "RunnerResponseWire")]
pub enum RunnerResponse {
    Completed(Vec<HintMessage>),
    Failed(JobError),
}

#[derive(Serialize, Deserialize)]
struct RunnerResponseWire {
    ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    messages: Vec<HintMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JobError>,
}

impl From<RunnerResponseWire> for RunnerResponse {
    fn from(wire: RunnerResponseWire) -> Self {
        if wire.ok {
            RunnerResponse::Completed(wire.messages)
        } else {
            RunnerResponse::Failed(wire.error.unwrap_or_else(|| {
                JobError::new("scan engine reported a failure without details")
            }))
        }
    }
}

impl From<RunnerResponse> for RunnerResponseWire {
    fn from(response: RunnerResponse) -> Self {
        match response {
            RunnerResponse::Completed(messages) => RunnerResponseWire {
                ok: true,
                messages,
                error: None,
            },
            RunnerResponse::Failed(error) => RunnerResponseWire {
                ok: false,
                messages: Vec::new(),
                error: Some(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_response_round_trips() {
        let response = RunnerResponse::Completed(vec![HintMessage::new("axe", "finding")]);
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["ok"], json!(true));
        assert_eq!(encoded["messages"][0]["hintId"], json!("axe"));

        let decoded: RunnerResponse = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn error_response_accepts_a_bare_string() {
        let decoded: RunnerResponse =
            serde_json::from_value(json!({ "ok": false, "error": "Error running webhint" }))
                .unwrap();
        assert_eq!(
            decoded,
            RunnerResponse::Failed(JobError::new("Error running webhint"))
        );
    }

    #[test]
    fn failure_without_details_still_decodes() {
        let decoded: RunnerResponse = serde_json::from_value(json!({ "ok": false })).unwrap();
        assert!(matches!(decoded, RunnerResponse::Failed(_)));
    }
}
