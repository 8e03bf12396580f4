use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("queue error: {0}")]
    Queue(#[source] anyhow::Error),

    #[error("datastore error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ScannerError>;
