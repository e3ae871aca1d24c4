use thiserror::Error;

/// Errors that can occur while consuming or decoding change events.
#[derive(Debug, Error)]
pub enum ChangeStreamError {
    /// The Kafka client reported an error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The message value was not valid JSON or had an unexpected shape.
    #[error("Malformed change event: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope carried an `op` code this consumer does not know.
    #[error("Unknown operation code: {0}")]
    UnknownOperation(String),

    /// The envelope had a payload but no `op` field.
    #[error("Change event has no operation code")]
    MissingOperation,

    /// Publishing to the dead-letter destination failed.
    #[error("Dead-letter publish failed: {0}")]
    DeadLetter(String),
}

/// Result type for change stream operations.
pub type Result<T> = std::result::Result<T, ChangeStreamError>;
