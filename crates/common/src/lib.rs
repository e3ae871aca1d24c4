//! Shared identifier types for the order sync consumer.

pub mod types;

pub use types::{AggregateKey, EntityKey};
