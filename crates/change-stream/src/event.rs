use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{ChangeStreamError, Result, StreamMessage};

/// A row image: column name to column value.
pub type Image = Map<String, Value>;

/// The kind of row change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// A row was inserted (`c`).
    Create,
    /// A row was updated (`u`).
    Update,
    /// A row was deleted (`d`).
    Delete,
    /// A row was read during the connector's initial snapshot (`r`).
    Read,
    /// The table was truncated (`t`). Carries no row images.
    Truncate,
}

impl Operation {
    /// Parses a Debezium `op` code.
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "c" => Ok(Self::Create),
            "u" => Ok(Self::Update),
            "d" => Ok(Self::Delete),
            "r" => Ok(Self::Read),
            "t" => Ok(Self::Truncate),
            other => Err(ChangeStreamError::UnknownOperation(other.to_string())),
        }
    }

    /// Returns the Debezium `op` code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Create => "c",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Read => "r",
            Self::Truncate => "t",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A single row-level change decoded from a CDC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The topic the event was delivered on (e.g. `dbserver1.public.orders`).
    pub topic: String,

    /// The source table (e.g. `orders`).
    pub table: String,

    /// What happened to the row.
    pub operation: Operation,

    /// Row state before the change. Present for updates and deletes.
    pub before: Option<Image>,

    /// Row state after the change. Present for creates, updates and snapshot reads.
    pub after: Option<Image>,

    /// Commit time in the source database, in milliseconds since the epoch.
    pub source_ts_ms: Option<i64>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    before: Option<Image>,
    #[serde(default)]
    after: Option<Image>,
    #[serde(default)]
    source: Option<Source>,
}

#[derive(Deserialize)]
struct Source {
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    ts_ms: Option<i64>,
}

impl ChangeEvent {
    /// Creates a new change event builder.
    pub fn builder() -> ChangeEventBuilder {
        ChangeEventBuilder::default()
    }

    /// Decodes a Debezium JSON message value received on `topic`.
    ///
    /// Returns `Ok(None)` for values that carry no change: a JSON `null`
    /// value, or an envelope without a `payload` object.
    pub fn decode(topic: &str, value: &[u8]) -> Result<Option<Self>> {
        let value: Value = serde_json::from_slice(value)?;
        if value.is_null() {
            return Ok(None);
        }

        let envelope: Envelope = serde_json::from_value(value)?;
        let Some(payload) = envelope.payload else {
            return Ok(None);
        };

        let operation = payload
            .op
            .as_deref()
            .ok_or(ChangeStreamError::MissingOperation)
            .and_then(Operation::from_code)?;

        let (table, source_ts_ms) = match payload.source {
            Some(source) => (source.table, source.ts_ms),
            None => (None, None),
        };

        Ok(Some(Self {
            topic: topic.to_string(),
            table: table.unwrap_or_else(|| table_from_topic(topic).to_string()),
            operation,
            before: payload.before,
            after: payload.after,
            source_ts_ms,
        }))
    }

    /// Encodes this event back into a Debezium envelope.
    pub fn encode(&self) -> Value {
        json!({
            "payload": {
                "op": self.operation.code(),
                "before": self.before,
                "after": self.after,
                "source": {
                    "table": self.table,
                    "ts_ms": self.source_ts_ms,
                },
            }
        })
    }

    /// Wraps the encoded event in a stream message at the given position.
    pub fn to_message(&self, partition: i32, offset: i64) -> StreamMessage {
        StreamMessage {
            topic: self.topic.clone(),
            partition,
            offset,
            key: None,
            payload: Some(self.encode().to_string().into_bytes()),
        }
    }

    /// Returns the image that identifies the affected row: the before-image
    /// for deletes, the after-image for everything else.
    pub fn image(&self) -> Option<&Image> {
        if self.operation.is_delete() {
            self.before.as_ref()
        } else {
            self.after.as_ref()
        }
    }
}

/// Returns the last `.`-separated segment of a Debezium topic name.
pub fn table_from_topic(topic: &str) -> &str {
    topic.rsplit('.').next().unwrap_or(topic)
}

/// Builder for constructing change events, mostly in tests.
#[derive(Debug, Default)]
pub struct ChangeEventBuilder {
    topic: Option<String>,
    table: Option<String>,
    operation: Option<Operation>,
    before: Option<Image>,
    after: Option<Image>,
    source_ts_ms: Option<i64>,
}

impl ChangeEventBuilder {
    /// Sets the topic. The table defaults to the topic's last segment.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Overrides the source table.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Sets the before-image. Non-object values are ignored.
    pub fn before(mut self, image: Value) -> Self {
        self.before = into_image(image);
        self
    }

    /// Sets the after-image. Non-object values are ignored.
    pub fn after(mut self, image: Value) -> Self {
        self.after = into_image(image);
        self
    }

    pub fn source_ts_ms(mut self, ts: i64) -> Self {
        self.source_ts_ms = Some(ts);
        self
    }

    /// Builds the change event.
    ///
    /// # Panics
    ///
    /// Panics if the topic or operation is not set.
    pub fn build(self) -> ChangeEvent {
        let topic = self.topic.expect("topic is required");
        ChangeEvent {
            table: self
                .table
                .unwrap_or_else(|| table_from_topic(&topic).to_string()),
            topic,
            operation: self.operation.expect("operation is required"),
            before: self.before,
            after: self.after,
            source_ts_ms: self.source_ts_ms,
        }
    }
}

fn into_image(value: Value) -> Option<Image> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
