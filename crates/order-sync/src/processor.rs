//! Per-record synchronization: decode, route, rebuild or delete, write.

use std::time::Instant;

use change_stream::{DeadLetter, DeadLetterSink, LoggingDeadLetterSink, StreamMessage};
use common::{AggregateKey, EntityKey};
use tracing::{debug, error, info};

use crate::reader::{FetchOutcome, RelationalReader};
use crate::retry::RetryPolicy;
use crate::router::{Action, ActionKind, EventRouter, Route, SkipReason};
use crate::writer::DocumentWriter;
use crate::{OrderDocument, SyncError};

/// What processing one record amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Upserted(AggregateKey),
    Deleted(AggregateKey),
    /// The aggregate no longer exists in the relational store; nothing was written.
    NotFound(AggregateKey),
    /// A secondary entity changed and the aggregates referencing it were rebuilt.
    FannedOut {
        entity: EntityKey,
        keys: usize,
        rebuilt: usize,
        dead_lettered: usize,
    },
    /// The record's effect could not be applied and was handed to the dead-letter sink.
    DeadLettered {
        key: Option<AggregateKey>,
        reason: String,
    },
}

/// Applies change records to the registered document writers.
///
/// Processing never fails outward: every record ends in a [`SyncOutcome`].
/// Relational fetch errors and writer errors are retried according to the
/// [`RetryPolicy`]; what still fails goes to the dead-letter sink.
pub struct SyncProcessor<R: RelationalReader> {
    router: EventRouter,
    reader: R,
    writers: Vec<Box<dyn DocumentWriter>>,
    dead_letters: Box<dyn DeadLetterSink>,
    retry: RetryPolicy,
}

impl<R: RelationalReader> SyncProcessor<R> {
    /// Creates a processor with no writers, the default retry policy, and a
    /// dead-letter sink that only logs.
    pub fn new(reader: R, router: EventRouter) -> Self {
        Self {
            router,
            reader,
            writers: Vec::new(),
            dead_letters: Box::new(LoggingDeadLetterSink),
            retry: RetryPolicy::default(),
        }
    }

    /// Registers a document writer. Writers are applied in registration order.
    pub fn register(&mut self, writer: Box<dyn DocumentWriter>) {
        self.writers.push(writer);
    }

    pub fn with_dead_letter_sink(mut self, sink: Box<dyn DeadLetterSink>) -> Self {
        self.dead_letters = sink;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the number of registered writers.
    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Processes one record from the change stream.
    #[tracing::instrument(
        skip(self, message),
        fields(topic = %message.topic, partition = message.partition, offset = message.offset)
    )]
    pub async fn process_message(&self, message: &StreamMessage) -> SyncOutcome {
        let started = Instant::now();

        let outcome = match message.decode() {
            Ok(Some(event)) => {
                let route = self.router.route(&event);
                debug!(
                    operation = %event.operation,
                    table = %event.table,
                    ?route,
                    "Routed change event"
                );
                self.apply(message, route).await
            }
            Ok(None) => SyncOutcome::Skipped(SkipReason::NoPayload),
            Err(e) => self.dead_letter(message, None, format!("decode failed: {e}")).await,
        };

        if let SyncOutcome::Skipped(reason) = &outcome {
            debug!(%reason, "Skipped change event");
            metrics::counter!("cdc_events_skipped", "reason" => reason.as_str()).increment(1);
        }
        metrics::histogram!("cdc_event_duration_seconds").record(started.elapsed().as_secs_f64());

        outcome
    }

    async fn apply(&self, message: &StreamMessage, route: Route) -> SyncOutcome {
        match route {
            Route::Skip(reason) => SyncOutcome::Skipped(reason),
            Route::Action(Action {
                kind: ActionKind::Upsert,
                key,
            }) => self.rebuild(message, key).await,
            Route::Action(Action {
                kind: ActionKind::Delete,
                key,
            }) => self.delete(message, key).await,
            Route::FanOut(entity) => self.fan_out(message, entity).await,
        }
    }

    async fn rebuild(&self, message: &StreamMessage, key: AggregateKey) -> SyncOutcome {
        let fetched = self
            .retry
            .run("fetch", || async move {
                match self.reader.fetch(key).await {
                    FetchOutcome::Found(document) => Ok(Some(document)),
                    FetchOutcome::NotFound => Ok(None),
                    FetchOutcome::FetchError(reason) => Err(reason),
                }
            })
            .await;

        match fetched {
            Ok(Some(document)) => match self.upsert_all(&document).await {
                Ok(()) => {
                    info!(order_id = %key, items = document.items.len(), "Synced order document");
                    metrics::counter!("cdc_documents_upserted").increment(1);
                    SyncOutcome::Upserted(key)
                }
                Err(e) => self.dead_letter(message, Some(key), e.to_string()).await,
            },
            Ok(None) => {
                info!(order_id = %key, "Order not found in source, skipping write");
                metrics::counter!("cdc_documents_not_found").increment(1);
                SyncOutcome::NotFound(key)
            }
            Err(reason) => {
                self.dead_letter(message, Some(key), format!("fetch failed: {reason}"))
                    .await
            }
        }
    }

    async fn upsert_all(&self, document: &OrderDocument) -> Result<(), SyncError> {
        for writer in &self.writers {
            self.retry
                .run("upsert", || writer.upsert(document))
                .await
                .map_err(|e| SyncError::Write(format!("{} upsert failed: {e}", writer.name())))?;
        }
        Ok(())
    }

    async fn delete(&self, message: &StreamMessage, key: AggregateKey) -> SyncOutcome {
        for writer in &self.writers {
            let deleted = self
                .retry
                .run("delete", || writer.delete_by_key(key))
                .await;
            if let Err(e) = deleted {
                let reason = format!("{} delete failed: {e}", writer.name());
                return self.dead_letter(message, Some(key), reason).await;
            }
        }

        info!(order_id = %key, "Deleted order document");
        metrics::counter!("cdc_documents_deleted").increment(1);
        SyncOutcome::Deleted(key)
    }

    async fn fan_out(&self, message: &StreamMessage, entity: EntityKey) -> SyncOutcome {
        let keys = match self
            .retry
            .run("lookup", || self.reader.keys_for_entity(entity))
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                return self
                    .dead_letter(message, None, format!("lookup for user {entity} failed: {e}"))
                    .await;
            }
        };

        let mut rebuilt = 0;
        let mut dead_lettered = 0;
        for &key in &keys {
            match self.rebuild(message, key).await {
                SyncOutcome::Upserted(_) => rebuilt += 1,
                SyncOutcome::DeadLettered { .. } => dead_lettered += 1,
                _ => {}
            }
        }

        info!(
            user_id = %entity,
            keys = keys.len(),
            rebuilt,
            dead_lettered,
            "Rebuilt orders referencing user"
        );

        SyncOutcome::FannedOut {
            entity,
            keys: keys.len(),
            rebuilt,
            dead_lettered,
        }
    }

    async fn dead_letter(
        &self,
        message: &StreamMessage,
        key: Option<AggregateKey>,
        reason: String,
    ) -> SyncOutcome {
        error!(
            order_id = ?key.map(|k| k.as_i64()),
            sink = self.dead_letters.name(),
            %reason,
            "Failed to process change record"
        );
        metrics::counter!("cdc_events_dead_lettered").increment(1);

        if let Err(e) = self
            .dead_letters
            .publish(DeadLetter::from_message(message, reason.clone()))
            .await
        {
            error!(error = %e, "Failed to publish dead letter");
        }

        SyncOutcome::DeadLettered { key, reason }
    }
}
