//! Dead-letter sinks for records whose effect could not be applied.
//!
//! A dead letter carries the original record coordinates and bytes so it
//! can be inspected and replayed once the cause is fixed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::{ChangeStreamError, KafkaConfig, Result, StreamMessage};

/// A record that failed processing, with the reason it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Captures `message` together with the failure reason.
    pub fn from_message(message: &StreamMessage, reason: impl Into<String>) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key.clone(),
            payload: message.payload.clone(),
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Destination for records whose processing failed for good.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Returns the name of this sink.
    fn name(&self) -> &'static str;

    /// Stores a dead letter.
    async fn publish(&self, letter: DeadLetter) -> Result<()>;
}

/// Sink that only logs dead letters. Used when no dead-letter topic is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for LoggingDeadLetterSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, letter: DeadLetter) -> Result<()> {
        error!(
            topic = %letter.topic,
            partition = letter.partition,
            offset = letter.offset,
            reason = %letter.reason,
            failed_at = %letter.failed_at,
            "Dropped change record"
        );
        Ok(())
    }
}

/// In-memory sink for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every dead letter published so far.
    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, letter: DeadLetter) -> Result<()> {
        self.letters.write().await.push(letter);
        Ok(())
    }
}

/// Sink that republishes the original record to a dead-letter topic.
///
/// The failure reason and source coordinates travel as record headers
/// (`dlq.reason`, `dlq.source.topic`, `dlq.source.partition`,
/// `dlq.source.offset`); key and value are copied unchanged.
pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    /// Creates a producer for the dead-letter topic.
    pub fn connect(config: &KafkaConfig, topic: impl Into<String>) -> Result<Self> {
        let producer: FutureProducer = config.build_producer_config().create()?;
        let topic = topic.into();

        info!(topic = %topic, "Dead-letter topic configured");

        Ok(Self { producer, topic })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn publish(&self, letter: DeadLetter) -> Result<()> {
        let record = dead_letter_record(&self.topic, &letter);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| ChangeStreamError::DeadLetter(e.to_string()))?;

        info!(
            topic = %self.topic,
            source_topic = %letter.topic,
            source_offset = letter.offset,
            "Published dead letter"
        );

        Ok(())
    }
}

/// Builds the record republished to `topic`: the original key and value, with
/// the failure reason and source coordinates as `dlq.*` headers.
fn dead_letter_record<'a>(
    topic: &'a str,
    letter: &'a DeadLetter,
) -> FutureRecord<'a, [u8], [u8]> {
    let partition = letter.partition.to_string();
    let offset = letter.offset.to_string();
    let headers = OwnedHeaders::new()
        .insert(Header {
            key: "dlq.reason",
            value: Some(letter.reason.as_str()),
        })
        .insert(Header {
            key: "dlq.source.topic",
            value: Some(letter.topic.as_str()),
        })
        .insert(Header {
            key: "dlq.source.partition",
            value: Some(partition.as_str()),
        })
        .insert(Header {
            key: "dlq.source.offset",
            value: Some(offset.as_str()),
        });

    let mut record = FutureRecord::to(topic).headers(headers);
    if let Some(ref key) = letter.key {
        record = record.key(key.as_slice());
    }
    if let Some(ref payload) = letter.payload {
        record = record.payload(payload.as_slice());
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> StreamMessage {
        StreamMessage {
            topic: "dbserver1.public.orders".to_string(),
            partition: 2,
            offset: 99,
            key: Some(b"42".to_vec()),
            payload: Some(b"{}".to_vec()),
        }
    }

    #[test]
    fn dead_letter_keeps_coordinates() {
        let letter = DeadLetter::from_message(&message(), "fetch failed");
        assert_eq!(letter.topic, "dbserver1.public.orders");
        assert_eq!(letter.partition, 2);
        assert_eq!(letter.offset, 99);
        assert_eq!(letter.key.as_deref(), Some(&b"42"[..]));
        assert_eq!(letter.reason, "fetch failed");
    }

    #[test]
    fn dead_letter_record_copies_bytes_and_adds_headers() {
        use rdkafka::message::Headers;

        let letter = DeadLetter::from_message(&message(), "fetch failed: timeout");
        let record = dead_letter_record("orders.dlq", &letter);

        assert_eq!(record.topic, "orders.dlq");
        assert_eq!(record.key, Some(&b"42"[..]));
        assert_eq!(record.payload, Some(&b"{}"[..]));

        let headers: Vec<(String, String)> = record
            .headers
            .as_ref()
            .unwrap()
            .iter()
            .map(|h| {
                let value = String::from_utf8(h.value.unwrap().to_vec()).unwrap();
                (h.key.to_string(), value)
            })
            .collect();
        assert_eq!(
            headers,
            vec![
                ("dlq.reason".to_string(), "fetch failed: timeout".to_string()),
                ("dlq.source.topic".to_string(), "dbserver1.public.orders".to_string()),
                ("dlq.source.partition".to_string(), "2".to_string()),
                ("dlq.source.offset".to_string(), "99".to_string()),
            ]
        );
    }

    #[test]
    fn tombstone_dead_letter_has_no_payload() {
        let mut tombstone = message();
        tombstone.key = None;
        tombstone.payload = None;
        let letter = DeadLetter::from_message(&tombstone, "decode failed");

        let record = dead_letter_record("orders.dlq", &letter);
        assert!(record.key.is_none());
        assert!(record.payload.is_none());
    }

    #[tokio::test]
    async fn in_memory_sink_collects_letters() {
        let sink = InMemoryDeadLetterSink::new();
        sink.publish(DeadLetter::from_message(&message(), "a"))
            .await
            .unwrap();
        sink.publish(DeadLetter::from_message(&message(), "b"))
            .await
            .unwrap();

        let letters = sink.letters().await;
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[1].reason, "b");
    }

    #[tokio::test]
    async fn logging_sink_never_fails() {
        let sink = LoggingDeadLetterSink;
        assert!(
            sink.publish(DeadLetter::from_message(&message(), "boom"))
                .await
                .is_ok()
        );
        assert_eq!(sink.name(), "log");
    }
}
