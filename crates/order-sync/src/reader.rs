//! Relational reader trait and the fetch outcome it reports.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateKey, EntityKey};
use tokio::sync::RwLock;

use crate::{OrderDocument, Result};

/// Result of rebuilding one aggregate from the relational store.
///
/// A missing row and a failed query are reported separately so the caller
/// can skip the former and retry the latter.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(OrderDocument),
    NotFound,
    FetchError(String),
}

impl From<Result<Option<OrderDocument>>> for FetchOutcome {
    fn from(result: Result<Option<OrderDocument>>) -> Self {
        match result {
            Ok(Some(document)) => Self::Found(document),
            Ok(None) => Self::NotFound,
            Err(e) => Self::FetchError(e.to_string()),
        }
    }
}

/// Source of truth for order documents.
#[async_trait]
pub trait RelationalReader: Send + Sync {
    /// Rebuilds the flattened document for `key`.
    async fn fetch(&self, key: AggregateKey) -> FetchOutcome;

    /// Returns the keys of every aggregate referencing `entity`.
    async fn keys_for_entity(&self, entity: EntityKey) -> Result<Vec<AggregateKey>>;
}

/// In-memory reader for testing.
///
/// Failures can be scripted per key: the next `n` fetches of that key
/// report a `FetchError` before the stored state is served again.
#[derive(Clone, Default)]
pub struct InMemoryRelationalReader {
    documents: Arc<RwLock<BTreeMap<AggregateKey, OrderDocument>>>,
    failures: Arc<RwLock<HashMap<AggregateKey, u32>>>,
    fetches: Arc<RwLock<Vec<AggregateKey>>>,
}

impl InMemoryRelationalReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores (or replaces) the row state for a document.
    pub async fn insert(&self, document: OrderDocument) {
        self.documents
            .write()
            .await
            .insert(document.key(), document);
    }

    pub async fn remove(&self, key: AggregateKey) {
        self.documents.write().await.remove(&key);
    }

    /// Makes the next `times` fetches of `key` fail.
    pub async fn fail_next(&self, key: AggregateKey, times: u32) {
        self.failures.write().await.insert(key, times);
    }

    /// Returns every key fetched so far, in order.
    pub async fn fetches(&self) -> Vec<AggregateKey> {
        self.fetches.read().await.clone()
    }
}

#[async_trait]
impl RelationalReader for InMemoryRelationalReader {
    async fn fetch(&self, key: AggregateKey) -> FetchOutcome {
        self.fetches.write().await.push(key);

        if let Some(remaining) = self.failures.write().await.get_mut(&key)
            && *remaining > 0
        {
            *remaining -= 1;
            return FetchOutcome::FetchError(format!("scripted failure for order {key}"));
        }

        match self.documents.read().await.get(&key) {
            Some(document) => FetchOutcome::Found(document.clone()),
            None => FetchOutcome::NotFound,
        }
    }

    async fn keys_for_entity(&self, entity: EntityKey) -> Result<Vec<AggregateKey>> {
        Ok(self
            .documents
            .read()
            .await
            .values()
            .filter(|document| document.user_id == Some(entity.as_i64()))
            .map(OrderDocument::key)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncError;

    #[tokio::test]
    async fn fetch_reports_found_and_not_found() {
        let reader = InMemoryRelationalReader::new();
        let key = AggregateKey::new(1);
        reader.insert(OrderDocument::new(key)).await;

        assert_eq!(
            reader.fetch(key).await,
            FetchOutcome::Found(OrderDocument::new(key))
        );
        assert_eq!(
            reader.fetch(AggregateKey::new(2)).await,
            FetchOutcome::NotFound
        );
        assert_eq!(reader.fetches().await.len(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_run_out() {
        let reader = InMemoryRelationalReader::new();
        let key = AggregateKey::new(1);
        reader.insert(OrderDocument::new(key)).await;
        reader.fail_next(key, 2).await;

        assert!(matches!(reader.fetch(key).await, FetchOutcome::FetchError(_)));
        assert!(matches!(reader.fetch(key).await, FetchOutcome::FetchError(_)));
        assert!(matches!(reader.fetch(key).await, FetchOutcome::Found(_)));
    }

    #[tokio::test]
    async fn keys_for_entity_filters_by_user() {
        let reader = InMemoryRelationalReader::new();
        reader
            .insert(OrderDocument::new(AggregateKey::new(1)).with_user(7, "an", "an@example.com"))
            .await;
        reader
            .insert(OrderDocument::new(AggregateKey::new(2)).with_user(8, "binh", "b@example.com"))
            .await;
        reader
            .insert(OrderDocument::new(AggregateKey::new(3)).with_user(7, "an", "an@example.com"))
            .await;

        let keys = reader.keys_for_entity(EntityKey::new(7)).await.unwrap();
        assert_eq!(keys, vec![AggregateKey::new(1), AggregateKey::new(3)]);
    }

    #[test]
    fn outcome_from_result() {
        let key = AggregateKey::new(4);
        assert_eq!(
            FetchOutcome::from(Ok(Some(OrderDocument::new(key)))),
            FetchOutcome::Found(OrderDocument::new(key))
        );
        assert_eq!(FetchOutcome::from(Ok(None)), FetchOutcome::NotFound);
        assert_eq!(
            FetchOutcome::from(Err(SyncError::Write("boom".to_string()))),
            FetchOutcome::FetchError("Write error: boom".to_string())
        );
    }
}
