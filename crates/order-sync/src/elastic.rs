//! Elasticsearch document writer.
//!
//! Mirrors order documents into a search index with partial-update upserts
//! (`doc_as_upsert`), so a document is created on first sight and replaced
//! field by field afterwards.

use std::time::Duration;

use async_trait::async_trait;
use common::AggregateKey;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use crate::{OrderDocument, Result, SyncError, writer::DocumentWriter};

/// Connection settings for the search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster, e.g. `https://search.internal:9200`.
    pub url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ElasticsearchConfig {
    pub fn new(url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index: index.into(),
            username: None,
            password: None,
        }
    }

    /// Add basic authentication.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Writes order documents to an Elasticsearch index over its REST API.
#[derive(Clone)]
pub struct ElasticsearchWriter {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchWriter {
    pub fn new(config: ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// `POST` target for a partial-update upsert.
    pub fn update_url(&self, key: AggregateKey) -> String {
        format!(
            "{}/{}/_update/{}?refresh=wait_for",
            self.base_url(),
            self.config.index,
            key
        )
    }

    /// `DELETE` target for a document.
    pub fn document_url(&self, key: AggregateKey) -> String {
        format!("{}/{}/_doc/{}", self.base_url(), self.config.index, key)
    }

    /// Builds the update body. `_id` is index metadata, not a document field.
    pub fn upsert_body(document: &OrderDocument) -> Result<Value> {
        let mut doc = serde_json::to_value(document)?;
        if let Some(fields) = doc.as_object_mut() {
            fields.remove("_id");
        }
        Ok(json!({ "doc": doc, "doc_as_upsert": true }))
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.config.username {
            Some(ref username) => builder.basic_auth(username, self.config.password.as_ref()),
            None => builder,
        }
    }

    async fn rejected(response: reqwest::Response) -> SyncError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SyncError::SearchIndexStatus { status, body }
    }
}

#[async_trait]
impl DocumentWriter for ElasticsearchWriter {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn upsert(&self, document: &OrderDocument) -> Result<()> {
        let body = Self::upsert_body(document)?;
        let response = self
            .request(Method::POST, self.update_url(document.key()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        debug!(
            order_id = %document.key(),
            index = %self.config.index,
            "Indexed order document"
        );
        Ok(())
    }

    async fn delete_by_key(&self, key: AggregateKey) -> Result<()> {
        let response = self
            .request(Method::DELETE, self.document_url(key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(Self::rejected(response).await);
        }

        debug!(
            order_id = %key,
            index = %self.config.index,
            "Removed order document from index"
        );
        Ok(())
    }
}
