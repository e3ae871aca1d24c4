//! Document writer trait and the in-memory writer used in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateKey;
use tokio::sync::RwLock;

use crate::{OrderDocument, Result, SyncError};

/// A target store for order documents.
///
/// Both operations must be idempotent: upserting the same document twice
/// leaves the same stored state, and deleting an absent key is a no-op.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Returns the name of this writer.
    fn name(&self) -> &'static str;

    /// Creates the document, or replaces its fields if it exists.
    async fn upsert(&self, document: &OrderDocument) -> Result<()>;

    /// Removes the document stored under `key`, if any.
    async fn delete_by_key(&self, key: AggregateKey) -> Result<()>;
}

/// In-memory writer for testing.
#[derive(Clone, Default)]
pub struct InMemoryDocumentWriter {
    documents: Arc<RwLock<BTreeMap<AggregateKey, OrderDocument>>>,
    failures: Arc<RwLock<u32>>,
    writes: Arc<RwLock<u64>>,
}

impl InMemoryDocumentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the stored document for `key`.
    pub async fn get(&self, key: AggregateKey) -> Option<OrderDocument> {
        self.documents.read().await.get(&key).cloned()
    }

    /// Gets all stored documents, ordered by key.
    pub async fn all(&self) -> Vec<OrderDocument> {
        self.documents.read().await.values().cloned().collect()
    }

    /// Returns the number of successful upserts and deletes.
    pub async fn write_count(&self) -> u64 {
        *self.writes.read().await
    }

    /// Makes the next `times` writes fail.
    pub async fn fail_next(&self, times: u32) {
        *self.failures.write().await = times;
    }

    async fn check_failure(&self) -> Result<()> {
        let mut failures = self.failures.write().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(SyncError::Write("scripted write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentWriter for InMemoryDocumentWriter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, document: &OrderDocument) -> Result<()> {
        self.check_failure().await?;
        self.documents
            .write()
            .await
            .insert(document.key(), document.clone());
        *self.writes.write().await += 1;
        Ok(())
    }

    async fn delete_by_key(&self, key: AggregateKey) -> Result<()> {
        self.check_failure().await?;
        self.documents.write().await.remove(&key);
        *self.writes.write().await += 1;
        Ok(())
    }
}
