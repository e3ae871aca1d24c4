//! Sync error types.

use thiserror::Error;

/// Errors that can occur while rebuilding or writing documents.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A relational database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A document store error.
    #[error("Document store error: {0}")]
    DocumentStore(#[from] mongodb::error::Error),

    /// A document could not be converted to BSON.
    #[error("BSON serialization error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    /// The search index could not be reached.
    #[error("Search index error: {0}")]
    SearchIndex(#[from] reqwest::Error),

    /// The search index answered with a non-success status.
    #[error("Search index rejected request with status {status}: {body}")]
    SearchIndexStatus { status: u16, body: String },

    /// A JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A writer-specific failure.
    #[error("Write error: {0}")]
    Write(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
