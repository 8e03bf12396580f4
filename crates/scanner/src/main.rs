use clap::Parser;
use dotenvy::dotenv;
use scanner::cli::{Cli, Commands};
use scanner::config::Config;
use scanner::constants::JOB_LEASE_TTL_SECS;
use scanner::runner::RunnerCommand;
use scanner::shutdown::Shutdown;
use scanner::status::StatusAggregator;
use scanner::sync::SyncService;
use scanner::worker::{WorkerConfig, WorkerService};
use std::sync::Arc;
use std::time::Duration;
use storage::MemoryStore;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let cli = Cli::parse();
    monitoring::init_logging()?;

    let config = Config::from_env()?;
    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    match cli.command {
        Commands::Worker {
            runner,
            engine_version,
            concurrency,
        } => {
            let worker_config = WorkerConfig {
                runner: RunnerCommand::new(runner),
                engine_version,
                max_message_size: config.max_message_size,
                concurrency,
            };
            let worker = WorkerService::new(&config, worker_config, shutdown).await?;
            worker.run().await?;
        }

        Commands::Sync => {
            // The datastore driver is deployment-specific and wired here;
            // the in-memory store stands in everywhere else.
            let store = Arc::new(MemoryStore::with_lease_ttl(Duration::from_secs(
                JOB_LEASE_TTL_SECS,
            )));
            let sync = SyncService::new(&config, store, shutdown).await?;
            sync.run().await?;
        }

        Commands::Status => {
            let store = Arc::new(MemoryStore::new());
            let status = StatusAggregator::new(&config, store, shutdown).await?;
            status.run().await?;
        }
    }

    info!("Shutdown complete");
    Ok(())
}
