use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{ChangeEvent, ChangeStreamError, Result, StreamMessage, stream::ChangeStream};

/// In-memory change stream for testing.
///
/// Delivers a fixed sequence of records and then ends. Commits are recorded
/// so tests can check which offsets were acknowledged.
#[derive(Default)]
pub struct InMemoryChangeStream {
    pending: VecDeque<Result<StreamMessage>>,
    next_offset: i64,
    committed: Arc<RwLock<Vec<StreamMessage>>>,
}

impl InMemoryChangeStream {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream that delivers `events` in order on partition 0.
    pub fn from_events(events: impl IntoIterator<Item = ChangeEvent>) -> Self {
        let mut stream = Self::new();
        for event in events {
            stream.push_event(&event);
        }
        stream
    }

    /// Queues an event, assigning it the next offset.
    pub fn push_event(&mut self, event: &ChangeEvent) {
        let message = event.to_message(0, self.next_offset);
        self.push_message(message);
    }

    /// Queues a raw record as-is.
    pub fn push_message(&mut self, message: StreamMessage) {
        self.next_offset = self.next_offset.max(message.offset + 1);
        self.pending.push_back(Ok(message));
    }

    /// Queues a record-level error.
    pub fn push_error(&mut self, error: ChangeStreamError) {
        self.pending.push_back(Err(error));
    }

    /// Returns the number of records not yet delivered.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Returns a handle on the list of committed records.
    pub fn committed(&self) -> Arc<RwLock<Vec<StreamMessage>>> {
        Arc::clone(&self.committed)
    }
}

#[async_trait]
impl ChangeStream for InMemoryChangeStream {
    async fn next_message(&mut self) -> Option<Result<StreamMessage>> {
        self.pending.pop_front()
    }

    async fn commit(&mut self, message: &StreamMessage) -> Result<()> {
        self.committed.write().await.push(message.clone());
        Ok(())
    }
}
