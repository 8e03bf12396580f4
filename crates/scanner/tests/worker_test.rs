//! End-to-end worker scenarios against a recording sink and shell-script
//! runners.

use anyhow::anyhow;
use async_trait::async_trait;
use clock::Clock;
use model::{HintStatus, JobError, ResultMessage, SubJob};
use queue::SendError;
use scanner::constants::TOO_MANY_ERRORS_MESSAGE;
use scanner::runner::RunnerCommand;
use scanner::shutdown::Shutdown;
use scanner::worker::{ResultSink, WorkerConfig, process_sub_job};
use serde_json::json;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Records every send attempt; can fail once with an oversize rejection or
/// a configurable number of transient errors.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<ResultMessage>>,
    oversize_once_at_messages: Mutex<Option<usize>>,
    transient_failures: Mutex<usize>,
}

impl RecordingSink {
    fn sent(&self) -> Vec<ResultMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn oversize_once_when_messages(&self, count: usize) {
        *self.oversize_once_at_messages.lock().unwrap() = Some(count);
    }

    fn fail_transiently(&self, times: usize) {
        *self.transient_failures.lock().unwrap() = times;
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn send(&self, message: &ResultMessage) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(message.clone());

        {
            let mut failures = self.transient_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(SendError::Transient(anyhow!("bus hiccup")));
            }
        }

        let total_messages: usize = message
            .hints()
            .iter()
            .map(|hint| hint.messages.len())
            .sum();
        let mut oversize = self.oversize_once_at_messages.lock().unwrap();
        if *oversize == Some(total_messages) {
            *oversize = None;
            return Err(SendError::Oversize {
                size: 300_000,
                limit: 262_144,
            });
        }

        Ok(())
    }
}

fn sub_job(config: serde_json::Value, hints: &[&str], max_run_time: u64) -> SubJob {
    serde_json::from_value(json!({
        "id": "job-1",
        "url": "https://example.com",
        "config": [config],
        "hints": hints
            .iter()
            .map(|name| json!({ "name": name, "status": "pending" }))
            .collect::<Vec<_>>(),
        "partInfo": { "part": 1, "totalParts": 1 },
        "maxRunTime": max_run_time
    }))
    .unwrap()
}

fn shell_runner(script: &str) -> RunnerCommand {
    RunnerCommand::with_args("/bin/sh", vec!["-c".into(), script.into()])
}

fn config(runner: RunnerCommand, max_message_size: usize) -> WorkerConfig {
    WorkerConfig {
        runner,
        engine_version: "2.4.0".into(),
        max_message_size,
        concurrency: 1,
    }
}

async fn run(sub_job: &SubJob, sink: &RecordingSink, config: &WorkerConfig) {
    let clock = Clock::system();
    let shutdown = Shutdown::new();
    process_sub_job(sub_job, sink, &clock, config, &shutdown).await;
}

fn hint_status(message: &ResultMessage, name: &str) -> HintStatus {
    message
        .hints()
        .iter()
        .find(|hint| hint.name == name)
        .unwrap_or_else(|| panic!("hint {name} missing"))
        .status
}

#[tokio::test]
async fn happy_path_emits_started_and_finished() {
    let sub_job = sub_job(
        json!({ "hints": { "content-type": "error" } }),
        &["content-type"],
        0,
    );
    let sink = RecordingSink::default();
    let config = config(
        shell_runner(r#"cat >/dev/null; printf '{"ok":true,"messages":[]}\n'"#),
        256 * 1024,
    );

    run(&sub_job, &sink, &config).await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);

    let ResultMessage::Started {
        engine_version,
        hints,
        ..
    } = &sent[0]
    else {
        panic!("first emission must be started");
    };
    assert_eq!(engine_version, "2.4.0");
    assert!(hints.iter().all(|hint| hint.status == HintStatus::Pending));

    assert!(matches!(sent[1], ResultMessage::Finished { error: None, .. }));
    assert_eq!(hint_status(&sent[1], "content-type"), HintStatus::Pass);
}

#[tokio::test]
async fn engine_error_marks_configured_hints() {
    let sub_job = sub_job(
        json!({ "hints": {
            "axe": "warning",
            "content-type": "error",
            "disown-opener": ["off", {}]
        } }),
        &["axe", "content-type", "disown-opener", "manifest-exists"],
        0,
    );
    let sink = RecordingSink::default();
    let config = config(
        shell_runner(
            r#"cat >/dev/null; printf '{"ok":false,"error":"Error running webhint"}\n'"#,
        ),
        256 * 1024,
    );

    run(&sub_job, &sink, &config).await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);

    let ResultMessage::Errored { error, .. } = &sent[1] else {
        panic!("terminal must be an error");
    };
    assert_eq!(error.message, "Error running webhint");
    assert_eq!(hint_status(&sent[1], "axe"), HintStatus::Error);
    assert_eq!(hint_status(&sent[1], "content-type"), HintStatus::Error);
    assert_eq!(hint_status(&sent[1], "disown-opener"), HintStatus::Off);
    assert_eq!(hint_status(&sent[1], "manifest-exists"), HintStatus::Pending);
}

#[tokio::test]
async fn bus_oversize_rejection_collapses_and_resends_once() {
    let sub_job = sub_job(json!({ "hints": { "axe": "warning" } }), &["axe"], 0);
    let sink = RecordingSink::default();
    sink.oversize_once_when_messages(2);
    let script = concat!(
        r#"cat >/dev/null; printf '%s\n' "#,
        r#"'{"ok":true,"messages":[{"hintId":"axe","message":"m1","severity":"warning"},"#,
        r#"{"hintId":"axe","message":"m2","severity":"warning"}]}'"#
    );
    let config = config(shell_runner(script), 256 * 1024);

    run(&sub_job, &sink, &config).await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 3, "started, rejected terminal, collapsed terminal");

    let rejected = &sent[1];
    assert_eq!(rejected.hints()[0].messages.len(), 2);

    let collapsed = &sent[2];
    assert!(matches!(collapsed, ResultMessage::Finished { .. }));
    let axe = &collapsed.hints()[0];
    assert_eq!(axe.status, HintStatus::Warning);
    assert_eq!(axe.messages.len(), 1);
    assert_eq!(axe.messages[0].message, TOO_MANY_ERRORS_MESSAGE);
}

#[tokio::test]
async fn oversized_terminal_is_partitioned_per_hint() {
    let sub_job = sub_job(
        json!({ "hints": { "hint-a": "error", "hint-b": "error" } }),
        &["hint-a", "hint-b"],
        0,
    );
    let sink = RecordingSink::default();

    // Each hint carries ~1.2 KiB of findings: more than half the 2 KiB
    // limit but comfortably under it.
    let payload_a = "a".repeat(1200);
    let payload_b = "b".repeat(1200);
    let response = json!({
        "ok": true,
        "messages": [
            { "hintId": "hint-a", "message": payload_a, "severity": "error" },
            { "hintId": "hint-b", "message": payload_b, "severity": "error" }
        ]
    });
    let script = format!("cat >/dev/null; printf '%s\\n' '{response}'");
    let config = config(shell_runner(&script), 2048);

    run(&sub_job, &sink, &config).await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 3, "started plus two terminal partitions");

    for terminal in &sent[1..] {
        assert!(matches!(terminal, ResultMessage::Finished { .. }));
        assert_eq!(terminal.id(), "job-1");
        assert_eq!(terminal.hints().len(), 1);
        assert!(serde_json::to_vec(terminal).unwrap().len() <= 2048);
    }
    let names: Vec<&str> = sent[1..]
        .iter()
        .flat_map(|m| m.hints().iter().map(|h| h.name.as_str()))
        .collect();
    assert_eq!(names, vec!["hint-a", "hint-b"]);
}

#[tokio::test]
async fn a_hint_bigger_than_the_limit_is_collapsed_proactively() {
    let sub_job = sub_job(
        json!({ "hints": { "axe": "warning", "content-type": "error" } }),
        &["axe", "content-type"],
        0,
    );
    let sink = RecordingSink::default();

    let huge = "x".repeat(5000);
    let response = json!({
        "ok": true,
        "messages": [
            { "hintId": "axe", "message": huge, "severity": "warning" }
        ]
    });
    let script = format!("cat >/dev/null; printf '%s\\n' '{response}'");
    let config = config(shell_runner(&script), 2048);

    run(&sub_job, &sink, &config).await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);

    let terminal = &sent[1];
    let axe = terminal.hints().iter().find(|h| h.name == "axe").unwrap();
    assert_eq!(axe.status, HintStatus::Warning);
    assert_eq!(axe.messages.len(), 1);
    assert_eq!(axe.messages[0].message, TOO_MANY_ERRORS_MESSAGE);
    assert_eq!(hint_status(terminal, "content-type"), HintStatus::Pass);
}

#[tokio::test]
async fn deadline_expiry_finishes_with_a_timeout_diagnostic() {
    let sub_job = sub_job(json!({ "hints": { "axe": "warning" } }), &["axe"], 1);
    let sink = RecordingSink::default();
    let config = config(shell_runner("sleep 5"), 256 * 1024);

    let begin = Instant::now();
    run(&sub_job, &sink, &config).await;
    let elapsed = begin.elapsed();
    assert!(
        elapsed < Duration::from_millis(1500),
        "teardown took {elapsed:?}"
    );

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);
    let ResultMessage::Finished { error: Some(error), .. } = &sent[1] else {
        panic!("a timeout is a finished result with a diagnostic");
    };
    assert_eq!(error.message, "TIMEOUT");
    assert_eq!(hint_status(&sent[1], "axe"), HintStatus::Pass);
}

#[tokio::test]
async fn transient_send_failures_are_retried() {
    let sub_job = sub_job(
        json!({ "hints": { "content-type": "error" } }),
        &["content-type"],
        0,
    );
    let sink = RecordingSink::default();
    sink.fail_transiently(2);
    let config = config(
        shell_runner(r#"cat >/dev/null; printf '{"ok":true,"messages":[]}\n'"#),
        256 * 1024,
    );

    run(&sub_job, &sink, &config).await;

    // Two failed attempts plus the successful started, then the terminal.
    let sent = sink.sent();
    assert_eq!(sent.len(), 4);
    assert!(matches!(sent[3], ResultMessage::Finished { .. }));
}

#[tokio::test]
async fn spawn_failure_is_reported_as_an_error_terminal() {
    let sub_job = sub_job(
        json!({ "hints": { "content-type": "error" } }),
        &["content-type"],
        0,
    );
    let sink = RecordingSink::default();
    let config = config(
        RunnerCommand::new("/nonexistent/scan-runner"),
        256 * 1024,
    );

    run(&sub_job, &sink, &config).await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);
    let ResultMessage::Errored { error, .. } = &sent[1] else {
        panic!("spawn failure must produce an error terminal");
    };
    assert!(error.message.contains("failed to spawn"));
    assert_eq!(hint_status(&sent[1], "content-type"), HintStatus::Error);
}

#[tokio::test]
async fn runner_crash_before_a_response_is_an_error() {
    let sub_job = sub_job(
        json!({ "hints": { "content-type": "error" } }),
        &["content-type"],
        0,
    );
    let sink = RecordingSink::default();
    let config = config(shell_runner("cat >/dev/null; exit 3"), 256 * 1024);

    run(&sub_job, &sink, &config).await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);
    let ResultMessage::Errored { error, .. } = &sent[1] else {
        panic!("crash must produce an error terminal");
    };
    assert!(error.message.contains("crashed"), "got: {}", error.message);
}

#[tokio::test]
async fn shutdown_cancels_the_run_and_fails_the_sub_job() {
    let sub_job = sub_job(
        json!({ "hints": { "content-type": "error" } }),
        &["content-type"],
        0,
    );
    let sink = RecordingSink::default();
    let config = config(shell_runner("sleep 5"), 256 * 1024);

    let clock = Clock::system();
    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.request();
    });

    let begin = Instant::now();
    process_sub_job(&sub_job, &sink, &clock, &config, &shutdown).await;
    assert!(begin.elapsed() < Duration::from_secs(3));

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);
    let ResultMessage::Errored { error, .. } = &sent[1] else {
        panic!("a canceled sub-job must fail");
    };
    assert_eq!(error, &JobError::new("worker shut down before the scan finished"));
}
