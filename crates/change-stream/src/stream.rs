use async_trait::async_trait;

use crate::{ChangeEvent, Result};

/// A raw record as delivered by the change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Topic the record was read from.
    pub topic: String,

    /// Partition within the topic.
    pub partition: i32,

    /// Offset within the partition.
    pub offset: i64,

    /// Record key, if any.
    pub key: Option<Vec<u8>>,

    /// Record value. `None` is a tombstone.
    pub payload: Option<Vec<u8>>,
}

impl StreamMessage {
    /// Decodes the record value as a change event.
    ///
    /// Tombstones and envelopes without a payload decode to `None`.
    pub fn decode(&self) -> Result<Option<ChangeEvent>> {
        match &self.payload {
            Some(bytes) => ChangeEvent::decode(&self.topic, bytes),
            None => Ok(None),
        }
    }
}

impl std::fmt::Display for StreamMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A pull-based source of change records.
///
/// Records are returned in delivery order. The consumer calls [`commit`]
/// once a record has been fully handled, so an implementation may redeliver
/// anything that was not committed (at-least-once).
///
/// [`commit`]: ChangeStream::commit
#[async_trait]
pub trait ChangeStream: Send {
    /// Waits for the next record.
    ///
    /// Returns `None` once the stream has ended. Errors are per-record: the
    /// caller may keep reading after one.
    async fn next_message(&mut self) -> Option<Result<StreamMessage>>;

    /// Marks `message` and everything before it on its partition as processed.
    async fn commit(&mut self, message: &StreamMessage) -> Result<()>;
}
