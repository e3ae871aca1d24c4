//! Keeps denormalized order documents in step with the relational source.
//!
//! This crate provides the synchronization pipeline:
//! - [`EventRouter`] decides what a change event means for the order aggregate
//! - [`RelationalReader`] rebuilds the flattened [`OrderDocument`] for a key
//! - [`DocumentWriter`] applies idempotent upserts and deletes to a target store
//! - [`SyncProcessor`] ties them together for one record, with retries and
//!   dead-lettering
//! - [`SyncLoop`] pulls records from a change stream and feeds the processor

pub mod document;
pub mod elastic;
pub mod error;
pub mod mongo;
pub mod postgres;
pub mod processor;
pub mod reader;
pub mod retry;
pub mod router;
pub mod sync_loop;
pub mod writer;

pub use document::{OrderDocument, OrderItem};
pub use elastic::{ElasticsearchConfig, ElasticsearchWriter};
pub use error::{Result, SyncError};
pub use mongo::MongoDocumentWriter;
pub use postgres::PostgresOrderReader;
pub use processor::{SyncOutcome, SyncProcessor};
pub use reader::{FetchOutcome, InMemoryRelationalReader, RelationalReader};
pub use retry::RetryPolicy;
pub use router::{Action, ActionKind, EventRouter, Route, RoutingTable, SkipReason};
pub use sync_loop::{SyncLoop, SyncStats};
pub use writer::{DocumentWriter, InMemoryDocumentWriter};
