use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateKey, EntityKey};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{debug, warn};

use crate::{
    OrderDocument, OrderItem, Result,
    reader::{FetchOutcome, RelationalReader},
};

/// Joins an order with its user and its line items. Items are aggregated into
/// a JSON array ordered by product then line, and the array is empty rather than NULL
/// when the order has no items.
const ORDER_DOCUMENT_QUERY: &str = r#"
    SELECT
        o.order_id::bigint AS order_id,
        o.order_date::timestamptz AS order_date,
        o.status::text AS order_status,
        u.user_id::bigint AS user_id,
        u.username::text AS username,
        u.email::text AS email,
        COALESCE(
            json_agg(
                json_build_object(
                    'product_id', p.product_id,
                    'product_name', p.product_name,
                    'price', p.price,
                    'quantity', oi.quantity
                )
                ORDER BY p.product_id, oi.order_item_id
            ) FILTER (WHERE p.product_id IS NOT NULL),
            '[]'::json
        ) AS items
    FROM orders o
    LEFT JOIN users u ON o.user_id = u.user_id
    LEFT JOIN order_items oi ON o.order_id = oi.order_id
    LEFT JOIN products p ON oi.product_id = p.product_id
    WHERE o.order_id = $1::bigint
    GROUP BY o.order_id, u.user_id
"#;

const ORDERS_FOR_USER_QUERY: &str = r#"
    SELECT o.order_id::bigint AS order_id
    FROM orders o
    WHERE o.user_id = $1::bigint
    ORDER BY o.order_id ASC
"#;

/// PostgreSQL-backed reader that rebuilds order documents with a single join.
#[derive(Clone)]
pub struct PostgresOrderReader {
    pool: PgPool,
}

impl PostgresOrderReader {
    /// Creates a new reader over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the document query, returning `None` when the order row is gone.
    pub async fn fetch_document(&self, key: AggregateKey) -> Result<Option<OrderDocument>> {
        let row: Option<PgRow> = sqlx::query(ORDER_DOCUMENT_QUERY)
            .bind(key.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_document).transpose()
    }

    fn row_to_document(row: PgRow) -> Result<OrderDocument> {
        let order_id = AggregateKey::new(row.try_get::<i64, _>("order_id")?);
        let items_json: serde_json::Value = row.try_get("items")?;
        let items: Vec<OrderItem> = serde_json::from_value(items_json)?;

        Ok(OrderDocument {
            id: order_id,
            order_id,
            order_date: row.try_get::<Option<DateTime<Utc>>, _>("order_date")?,
            order_status: row.try_get("order_status")?,
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            items,
        })
    }
}

#[async_trait]
impl RelationalReader for PostgresOrderReader {
    #[tracing::instrument(skip(self), fields(order_id = %key))]
    async fn fetch(&self, key: AggregateKey) -> FetchOutcome {
        let outcome = FetchOutcome::from(self.fetch_document(key).await);
        match &outcome {
            FetchOutcome::Found(document) => {
                debug!(items = document.items.len(), "Rebuilt order document");
            }
            FetchOutcome::NotFound => debug!("Order row not found"),
            FetchOutcome::FetchError(reason) => {
                warn!(error = %reason, "Failed to fetch order document");
            }
        }
        outcome
    }

    async fn keys_for_entity(&self, entity: EntityKey) -> Result<Vec<AggregateKey>> {
        let ids: Vec<i64> = sqlx::query_scalar(ORDERS_FOR_USER_QUERY)
            .bind(entity.as_i64())
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.into_iter().map(AggregateKey::new).collect())
    }
}
