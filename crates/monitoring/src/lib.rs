//! Logging setup shared by the pipeline services
//!
//! Every binary initializes tracing through this crate so the fleet logs
//! uniformly. Output goes to stdout or to daily rotating files depending on
//! `LOG_DESTINATION`; verbosity follows `RUST_LOG`.

pub mod logging;

pub use logging::init_logging;
