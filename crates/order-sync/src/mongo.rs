//! MongoDB document writer.

use async_trait::async_trait;
use common::AggregateKey;
use mongodb::bson::{Document, doc};
use mongodb::options::UpdateOptions;
use mongodb::{Client, Collection};
use tracing::{debug, info};

use crate::{OrderDocument, Result, writer::DocumentWriter};

/// Writes order documents to one MongoDB collection, keyed by `_id`.
#[derive(Clone)]
pub struct MongoDocumentWriter {
    collection: Collection<Document>,
}

impl MongoDocumentWriter {
    /// Creates a writer for `database.collection` on an existing client.
    pub fn new(client: &Client, database: &str, collection: &str) -> Self {
        Self {
            collection: client.database(database).collection(collection),
        }
    }

    /// Connects to MongoDB and checks the server answers a ping.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        client.database(database).run_command(doc! { "ping": 1 }).await?;

        info!(database, collection, "Connected to MongoDB");

        Ok(Self::new(&client, database, collection))
    }

    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }

    /// Builds the `$set` body for an upsert. `_id` comes from the filter, so
    /// it is left out of the update.
    pub fn set_fields(document: &OrderDocument) -> Result<Document> {
        let mut fields = mongodb::bson::to_document(document)?;
        fields.remove("_id");
        Ok(fields)
    }
}

#[async_trait]
impl DocumentWriter for MongoDocumentWriter {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn upsert(&self, document: &OrderDocument) -> Result<()> {
        let filter = doc! { "_id": document.key().as_i64() };
        let update = doc! { "$set": Self::set_fields(document)? };
        let options = UpdateOptions::builder().upsert(true).build();

        let result = self
            .collection
            .update_one(filter, update)
            .with_options(options)
            .await?;

        debug!(
            order_id = %document.key(),
            matched = result.matched_count,
            upserted = result.upserted_id.is_some(),
            "Upserted order document"
        );

        Ok(())
    }

    async fn delete_by_key(&self, key: AggregateKey) -> Result<()> {
        let result = self
            .collection
            .delete_one(doc! { "_id": key.as_i64() })
            .await?;

        debug!(order_id = %key, deleted = result.deleted_count, "Deleted order document");

        Ok(())
    }
}
