use model::{JobError, RunnerResponse, SubJob};
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let mut input = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut input).await {
        respond(&RunnerResponse::Failed(JobError::new(format!(
            "failed to read the sub-job from stdin: {e}"
        ))))
        .await;
        return 1;
    }

    let sub_job: SubJob = match serde_json::from_str(&input) {
        Ok(sub_job) => sub_job,
        Err(e) => {
            respond(&RunnerResponse::Failed(JobError::new(format!(
                "malformed sub-job: {e}"
            ))))
            .await;
            return 1;
        }
    };

    tokio::select! {
        response = scan_runner::execute(&sub_job) => {
            let code = match response {
                RunnerResponse::Completed(_) => 0,
                RunnerResponse::Failed(_) => 1,
            };
            respond(&response).await;
            code
        }
        // The worker tears us down on deadline or shutdown; dropping the
        // scan future kills the engine child with it.
        _ = terminate_signal() => 0,
        _ = tokio::signal::ctrl_c() => 0,
    }
}

async fn respond(response: &RunnerResponse) {
    let mut line = match serde_json::to_string(response) {
        Ok(line) => line,
        Err(e) => {
            eprintln!("scan-runner: failed to encode response: {e}");
            return;
        }
    };
    line.push('\n');

    let mut stdout = io::stdout();
    if let Err(e) = stdout.write_all(line.as_bytes()).await {
        eprintln!("scan-runner: failed to write response: {e}");
        return;
    }
    let _ = stdout.flush().await;
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await
}
