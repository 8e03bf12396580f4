//! Supervision of one scan-runner child per sub-job
//!
//! Each sub-job owns its child handle: spawn, hand over the sub-job on
//! stdin, then wait for the first of response, deadline or worker shutdown.
//! Every exit path tears the child down deterministically.

use crate::constants::RUNNER_TERM_GRACE_MS;
use crate::shutdown::Shutdown;
use model::{HintMessage, JobError, RunnerResponse, SubJob};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// The executable (plus fixed arguments) that runs one sub-job over the
/// stdin/stdout contract.
#[derive(Debug, Clone)]
pub struct RunnerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl RunnerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for RunnerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a supervised run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Vec<HintMessage>),
    Failed(JobError),
    TimedOut,
    Canceled,
}

pub struct RunnerHandle {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl RunnerHandle {
    /// Spawns a runner and hands it the sub-job. Failures surface as the
    /// job error they are reported with.
    pub async fn spawn(command: &RunnerCommand, sub_job: &SubJob) -> Result<Self, JobError> {
        let request = serde_json::to_vec(sub_job)
            .map_err(|e| JobError::new(format!("failed to encode the sub-job: {e}")))?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                JobError::new(format!(
                    "failed to spawn scan runner {}: {e}",
                    command.program.display()
                ))
            })?;

        let Some(stdout) = child.stdout.take().map(BufReader::new) else {
            return Err(JobError::new("scan runner was spawned without a stdout pipe"));
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&request)
                .await
                .map_err(|e| JobError::new(format!("failed to hand the sub-job over: {e}")))?;
            // Dropping stdin closes the pipe; the runner reads to EOF.
        }

        Ok(Self { child, stdout })
    }

    /// Waits for the first of: a response, the deadline, worker shutdown.
    /// The child is gone by the time this returns.
    pub async fn wait(mut self, deadline: Duration, shutdown: &Shutdown) -> RunOutcome {
        enum Event {
            Response(RunOutcome),
            Deadline,
            Shutdown,
        }

        let event = {
            let response = self.read_response();
            tokio::pin!(response);
            tokio::select! {
                outcome = &mut response => Event::Response(outcome),
                _ = sleep(deadline) => Event::Deadline,
                _ = shutdown.requested() => Event::Shutdown,
            }
        };

        match event {
            Event::Response(outcome) => {
                self.reap().await;
                outcome
            }
            Event::Deadline => {
                warn!("Runner hit the {}s deadline, tearing it down", deadline.as_secs());
                self.terminate().await;
                RunOutcome::TimedOut
            }
            Event::Shutdown => {
                self.terminate().await;
                RunOutcome::Canceled
            }
        }
    }

    async fn read_response(&mut self) -> RunOutcome {
        let mut line = String::new();
        match self.stdout.read_line(&mut line).await {
            Ok(0) => self.exit_outcome().await,
            Ok(_) => match serde_json::from_str::<RunnerResponse>(&line) {
                Ok(RunnerResponse::Completed(messages)) => RunOutcome::Completed(messages),
                Ok(RunnerResponse::Failed(error)) => RunOutcome::Failed(error),
                Err(e) => RunOutcome::Failed(JobError::new(format!(
                    "scan runner wrote a malformed response: {e}"
                ))),
            },
            Err(e) => RunOutcome::Failed(JobError::new(format!(
                "failed to read from the scan runner: {e}"
            ))),
        }
    }

    /// EOF before any response: the exit status tells a crash apart from a
    /// silent exit.
    async fn exit_outcome(&mut self) -> RunOutcome {
        match self.child.wait().await {
            Ok(status) if status.success() => {
                RunOutcome::Failed(JobError::new("scan runner exited without a response"))
            }
            Ok(status) => {
                RunOutcome::Failed(JobError::new(format!("scan runner crashed with {status}")))
            }
            Err(e) => RunOutcome::Failed(JobError::new(format!(
                "failed to reap the scan runner: {e}"
            ))),
        }
    }

    /// The runner exits on its own after responding; give it a moment, then
    /// make sure.
    async fn reap(mut self) {
        match timeout(Duration::from_millis(RUNNER_TERM_GRACE_MS), self.child.wait()).await {
            Ok(Ok(status)) => debug!("Runner exited with {status}"),
            Ok(Err(e)) => warn!("Failed to reap the runner: {e}"),
            Err(_) => {
                warn!("Runner still alive after responding, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!("Failed to kill the runner: {e}");
                }
            }
        }
    }

    /// SIGTERM, a short grace, then the hard kill.
    async fn terminate(mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to runner {pid} failed: {e}");
            }
            if timeout(Duration::from_millis(RUNNER_TERM_GRACE_MS), self.child.wait())
                .await
                .is_ok()
            {
                return;
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill the runner: {e}");
        }
    }
}
