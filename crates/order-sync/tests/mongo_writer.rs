//! MongoDB integration tests for the document writer.
//!
//! One MongoDB container is shared by all tests; each test writes to its own
//! collection.

use std::sync::Arc;

use common::AggregateKey;
use mongodb::bson::doc;
use order_sync::{DocumentWriter, MongoDocumentWriter, OrderDocument, OrderItem};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::mongo::Mongo;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Mongo>,
    uri: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Mongo::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(27017).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                uri: format!("mongodb://{}:{}", host, port),
            })
        })
        .await
        .clone()
}

async fn writer(collection: &str) -> MongoDocumentWriter {
    let info = get_container_info().await;
    MongoDocumentWriter::connect(&info.uri, "cdc_test", collection)
        .await
        .unwrap()
}

fn order(status: &str) -> OrderDocument {
    OrderDocument::new(AggregateKey::new(42))
        .with_status(status)
        .with_user(7, "an", "an@example.com")
        .with_item(OrderItem {
            product_id: 1001,
            product_name: Some("Widget".to_string()),
            price: Some(9.5),
            quantity: Some(2),
        })
}

#[tokio::test]
async fn upsert_creates_document_under_order_id() {
    let writer = writer("upsert_creates").await;

    writer.upsert(&order("NEW")).await.unwrap();

    let stored = writer
        .collection()
        .find_one(doc! { "_id": 42_i64 })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_i64("order_id").unwrap(), 42);
    assert_eq!(stored.get_str("order_status").unwrap(), "NEW");
    assert_eq!(stored.get_str("username").unwrap(), "an");
    assert_eq!(stored.get_array("items").unwrap().len(), 1);
}

#[tokio::test]
async fn repeated_upserts_leave_one_document() {
    let writer = writer("repeated_upserts").await;

    writer.upsert(&order("NEW")).await.unwrap();
    writer.upsert(&order("NEW")).await.unwrap();

    let count = writer.collection().count_documents(doc! {}).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn upsert_replaces_fields() {
    let writer = writer("upsert_replaces").await;

    writer.upsert(&order("NEW")).await.unwrap();
    writer
        .upsert(&OrderDocument::new(AggregateKey::new(42)).with_status("SHIPPED"))
        .await
        .unwrap();

    let stored = writer
        .collection()
        .find_one(doc! { "_id": 42_i64 })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_str("order_status").unwrap(), "SHIPPED");
    assert!(stored.get_array("items").unwrap().is_empty());
}

#[tokio::test]
async fn delete_removes_document_and_tolerates_absence() {
    let writer = writer("delete_removes").await;

    writer.upsert(&order("NEW")).await.unwrap();
    writer.delete_by_key(AggregateKey::new(42)).await.unwrap();
    writer.delete_by_key(AggregateKey::new(42)).await.unwrap();

    let stored = writer
        .collection()
        .find_one(doc! { "_id": 42_i64 })
        .await
        .unwrap();
    assert!(stored.is_none());
}
