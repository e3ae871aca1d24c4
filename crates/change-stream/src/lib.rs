//! Change events produced by a log-based CDC connector, and the streams that
//! deliver them.
//!
//! - [`ChangeEvent`] decodes a Debezium envelope into a typed row change
//! - [`ChangeStream`] is the pull-based source the sync loop reads from
//! - [`KafkaChangeStream`] and [`InMemoryChangeStream`] implement it
//! - [`DeadLetterSink`] receives messages whose effect could not be applied

pub mod dead_letter;
pub mod error;
pub mod event;
pub mod kafka;
pub mod memory;
pub mod stream;

pub use common::{AggregateKey, EntityKey};
pub use dead_letter::{
    DeadLetter, DeadLetterSink, InMemoryDeadLetterSink, KafkaDeadLetterSink, LoggingDeadLetterSink,
};
pub use error::{ChangeStreamError, Result};
pub use event::{ChangeEvent, ChangeEventBuilder, Image, Operation};
pub use kafka::{KafkaChangeStream, KafkaConfig};
pub use memory::InMemoryChangeStream;
pub use stream::{ChangeStream, StreamMessage};
