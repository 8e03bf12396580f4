use crate::constants::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{Result, ScannerError};
use std::env;

/// Connection settings shared by every service. The deployment exposes them
/// under exactly these environment names.
#[derive(Debug, Clone)]
pub struct Config {
    /// Message-bus connection string (`queue`).
    pub queue: String,
    /// Datastore connection string (`database`). Consumed by the datastore
    /// collaborator; the in-memory store ignores it.
    pub database: Option<String>,
    /// Datastore credentials for operational tasks
    /// (`adminUser` / `adminPassword`).
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    /// Hard cap on a bus payload, in bytes (`MAX_MESSAGE_SIZE`).
    pub max_message_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let queue = env::var("queue").map_err(|_| {
            ScannerError::Config("missing required environment variable 'queue'".into())
        })?;

        let max_message_size = match env::var("MAX_MESSAGE_SIZE") {
            Ok(raw) => raw.parse().map_err(|_| {
                ScannerError::Config(format!(
                    "MAX_MESSAGE_SIZE must be a number of bytes, got '{raw}'"
                ))
            })?,
            Err(_) => DEFAULT_MAX_MESSAGE_SIZE,
        };

        Ok(Self {
            queue,
            database: env::var("database").ok(),
            admin_user: env::var("adminUser").ok(),
            admin_password: env::var("adminPassword").ok(),
            max_message_size,
        })
    }
}
