//! Scanner services
//!
//! One binary, three long-running services: the worker (consumes sub-jobs,
//! runs scans in child processes, emits results), the sync service (merges
//! results into the durable job records) and the status aggregator
//! (quarter-hour counters). They share the queue wrapper, the clock and the
//! storage trait; fleet deployments run many workers against one sync.

pub mod chunk;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod hints;
pub mod merge;
pub mod runner;
pub mod shutdown;
pub mod status;
pub mod sync;
pub mod worker;
