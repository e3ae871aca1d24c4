//! The top-level loop: pull a record, process it, commit it, repeat.

use std::future::Future;

use change_stream::ChangeStream;
use tracing::{error, info, warn};

use crate::processor::{SyncOutcome, SyncProcessor};
use crate::reader::RelationalReader;

/// Counters for one run of the sync loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub received: u64,
    pub upserted: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub not_found: u64,
    pub dead_lettered: u64,
    pub stream_errors: u64,
}

impl SyncStats {
    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Skipped(_) => self.skipped += 1,
            SyncOutcome::Upserted(_) => self.upserted += 1,
            SyncOutcome::Deleted(_) => self.deleted += 1,
            SyncOutcome::NotFound(_) => self.not_found += 1,
            SyncOutcome::FannedOut {
                rebuilt,
                dead_lettered,
                ..
            } => {
                self.upserted += *rebuilt as u64;
                self.dead_lettered += *dead_lettered as u64;
            }
            SyncOutcome::DeadLettered { .. } => self.dead_lettered += 1,
        }
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} upserted={} deleted={} skipped={} not_found={} dead_lettered={} \
             stream_errors={}",
            self.received,
            self.upserted,
            self.deleted,
            self.skipped,
            self.not_found,
            self.dead_lettered,
            self.stream_errors
        )
    }
}

/// Reads a change stream strictly in order and applies each record before
/// pulling the next one.
///
/// A record's offset is committed once it has been processed, whatever the
/// outcome; failed records live on in the dead-letter sink.
pub struct SyncLoop<S: ChangeStream, R: RelationalReader> {
    stream: S,
    processor: SyncProcessor<R>,
    stats: SyncStats,
}

impl<S: ChangeStream, R: RelationalReader> SyncLoop<S, R> {
    pub fn new(stream: S, processor: SyncProcessor<R>) -> Self {
        Self {
            stream,
            processor,
            stats: SyncStats::default(),
        }
    }

    pub fn processor(&self) -> &SyncProcessor<R> {
        &self.processor
    }

    /// Returns the counters accumulated so far.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Runs until the stream ends.
    pub async fn run(&mut self) -> SyncStats {
        self.run_until(std::future::pending()).await
    }

    /// Runs until the stream ends or `shutdown` completes.
    ///
    /// `shutdown` is only polled while waiting for the next record, so a
    /// record that has been received is processed and committed before the
    /// loop returns.
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> SyncStats {
        info!(writers = self.processor.writer_count(), "Sync loop started");
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(stats = %self.stats, "Sync loop stopped on shutdown");
                    return self.stats;
                }
                next = self.stream.next_message() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.stats.stream_errors += 1;
                    error!(error = %e, "Failed to receive change record");
                    continue;
                }
                None => break,
            };

            self.stats.received += 1;
            metrics::counter!("cdc_messages_received").increment(1);

            let outcome = self.processor.process_message(&message).await;
            self.stats.record(&outcome);

            if let Err(e) = self.stream.commit(&message).await {
                warn!(error = %e, record = %message, "Failed to commit offset");
            }
        }

        info!(stats = %self.stats, "Change stream ended");
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DocumentWriter, EventRouter, InMemoryDocumentWriter, InMemoryRelationalReader,
        OrderDocument, RetryPolicy, RoutingTable,
    };
    use async_trait::async_trait;
    use change_stream::{ChangeEvent, ChangeStreamError, InMemoryChangeStream, Operation};
    use common::AggregateKey;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Writer that signals the first time it is asked to upsert.
    struct SignallingWriter {
        upserted: Mutex<Option<oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl DocumentWriter for SignallingWriter {
        fn name(&self) -> &'static str {
            "signalling"
        }

        async fn upsert(&self, _document: &OrderDocument) -> crate::Result<()> {
            if let Some(tx) = self.upserted.lock().unwrap().take() {
                let _ = tx.send(());
            }
            Ok(())
        }

        async fn delete_by_key(&self, _key: AggregateKey) -> crate::Result<()> {
            Ok(())
        }
    }

    fn order_created(order_id: i64) -> ChangeEvent {
        ChangeEvent::builder()
            .topic("dbserver1.public.orders")
            .operation(Operation::Create)
            .after(json!({"order_id": order_id}))
            .build()
    }

    #[tokio::test]
    async fn processes_every_record_and_commits_it() {
        let reader = InMemoryRelationalReader::new();
        reader.insert(OrderDocument::new(AggregateKey::new(1))).await;
        let writer = InMemoryDocumentWriter::new();

        let mut processor = SyncProcessor::new(reader, EventRouter::default());
        processor.register(Box::new(writer.clone()));

        let stream = InMemoryChangeStream::from_events([order_created(1), order_created(2)]);
        let committed = stream.committed();
        let mut sync = SyncLoop::new(stream, processor);

        let stats = sync.run().await;

        assert_eq!(stats.received, 2);
        assert_eq!(stats.upserted, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(committed.read().await.len(), 2);
        assert_eq!(sync.stats(), stats);
    }

    #[tokio::test]
    async fn stream_errors_do_not_stop_the_loop() {
        let reader = InMemoryRelationalReader::new();
        reader.insert(OrderDocument::new(AggregateKey::new(1))).await;
        let writer = InMemoryDocumentWriter::new();

        let mut processor = SyncProcessor::new(reader, EventRouter::default());
        processor.register(Box::new(writer.clone()));

        let mut stream = InMemoryChangeStream::new();
        stream.push_error(ChangeStreamError::MissingOperation);
        stream.push_event(&order_created(1));
        let mut sync = SyncLoop::new(stream, processor);

        let stats = sync.run().await;

        assert_eq!(stats.stream_errors, 1);
        assert_eq!(stats.upserted, 1);
        assert!(writer.get(AggregateKey::new(1)).await.is_some());
    }

    #[tokio::test]
    async fn shutdown_stops_after_the_record_in_hand() {
        let reader = InMemoryRelationalReader::new();
        reader.insert(OrderDocument::new(AggregateKey::new(1))).await;
        reader.insert(OrderDocument::new(AggregateKey::new(2))).await;

        let (tx, rx) = oneshot::channel();
        let mut processor = SyncProcessor::new(reader, EventRouter::default());
        processor.register(Box::new(SignallingWriter {
            upserted: Mutex::new(Some(tx)),
        }));

        let stream = InMemoryChangeStream::from_events([order_created(1), order_created(2)]);
        let committed = stream.committed();
        let mut sync = SyncLoop::new(stream, processor);

        let stats = sync
            .run_until(async move {
                let _ = rx.await;
            })
            .await;

        assert_eq!(stats.received, 1);
        assert_eq!(stats.upserted, 1);
        assert_eq!(committed.read().await.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_before_start_processes_nothing() {
        let processor = SyncProcessor::new(InMemoryRelationalReader::new(), EventRouter::default());
        let stream = InMemoryChangeStream::from_events([order_created(1)]);
        let committed = stream.committed();
        let mut sync = SyncLoop::new(stream, processor);

        let stats = sync.run_until(async {}).await;

        assert_eq!(stats, SyncStats::default());
        assert!(committed.read().await.is_empty());
    }

    #[tokio::test]
    async fn fan_out_failures_are_counted_as_dead_letters() {
        let reader = InMemoryRelationalReader::new();
        reader
            .insert(OrderDocument::new(AggregateKey::new(1)).with_user(7, "an", "an@example.com"))
            .await;
        reader
            .insert(OrderDocument::new(AggregateKey::new(2)).with_user(7, "an", "an@example.com"))
            .await;
        reader.fail_next(AggregateKey::new(2), 10).await;

        let table = RoutingTable {
            fan_out_secondary: true,
            ..RoutingTable::default()
        };
        let mut processor = SyncProcessor::new(reader, EventRouter::new(table))
            .with_retry_policy(
                RetryPolicy::new(1).with_delays(Duration::from_millis(1), Duration::from_millis(2)),
            );
        processor.register(Box::new(InMemoryDocumentWriter::new()));

        let user_updated = ChangeEvent::builder()
            .topic("dbserver1.public.users")
            .operation(Operation::Update)
            .after(json!({"user_id": 7}))
            .build();
        let mut sync = SyncLoop::new(InMemoryChangeStream::from_events([user_updated]), processor);

        let stats = sync.run().await;

        assert_eq!(stats.received, 1);
        assert_eq!(stats.upserted, 1);
        assert_eq!(stats.dead_lettered, 1);
    }

    #[test]
    fn stats_display() {
        let stats = SyncStats {
            received: 3,
            upserted: 1,
            skipped: 2,
            stream_errors: 4,
            ..SyncStats::default()
        };
        assert_eq!(
            stats.to_string(),
            "received=3 upserted=1 deleted=0 skipped=2 not_found=0 dead_lettered=0 stream_errors=4"
        );
    }
}
