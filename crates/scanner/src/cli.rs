use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scanner")]
#[command(about = "Distributed scanning pipeline services", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the worker service
    Worker {
        /// Executable that runs one sub-job (the scan-runner binary)
        #[arg(long, env = "RUNNER_BIN", default_value = "scan-runner")]
        runner: PathBuf,

        /// Version string of the engine behind the runner
        #[arg(long, env = "ENGINE_VERSION", default_value = "unknown")]
        engine_version: String,

        /// Sub-jobs processed concurrently by this process
        #[arg(long, default_value = "1")]
        concurrency: usize,
    },

    /// Start the sync service
    Sync,

    /// Start the status aggregator
    Status,
}
