use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of the aggregate whose document is rebuilt (an order id).
///
/// Wraps the integer primary key of the aggregate's root table so it can't be
/// mixed up with other integer columns read from a change image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateKey(i64);

impl AggregateKey {
    /// Creates an aggregate key from a raw id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Reads a key out of a JSON column value.
    ///
    /// Accepts integers and strings holding a decimal integer. Anything else
    /// (null, floats, booleans, objects) yields `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        parse_integer(value).map(Self)
    }

    /// Returns the raw id.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AggregateKey {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<AggregateKey> for i64 {
    fn from(key: AggregateKey) -> Self {
        key.0
    }
}

/// Identifier of a secondary entity referenced by aggregates (a user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(i64);

impl EntityKey {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        parse_integer(value).map(Self)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
