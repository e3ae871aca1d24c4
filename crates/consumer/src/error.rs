//! Startup errors. Everything that fails after the loop has started is
//! handled per record and never reaches this type.

use change_stream::ChangeStreamError;
use order_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("PostgreSQL connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Change stream setup failed: {0}")]
    ChangeStream(#[from] ChangeStreamError),

    #[error("Document writer setup failed: {0}")]
    Sync(#[from] SyncError),

    #[error("Failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
