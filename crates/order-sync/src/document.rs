//! The flattened order document written to the target stores.

use chrono::{DateTime, Utc};
use common::AggregateKey;
use serde::{Deserialize, Serialize};

/// One line item of an order, joined with its product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: i64,
    pub product_name: Option<String>,
    pub price: Option<f64>,
    pub quantity: Option<i64>,
}

/// Denormalized projection of an order, its user, and its line items.
///
/// Rebuilt in full from the relational store on every relevant change; the
/// document id is the order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDocument {
    #[serde(rename = "_id")]
    pub id: AggregateKey,
    pub order_id: AggregateKey,
    pub order_date: Option<DateTime<Utc>>,
    pub order_status: Option<String>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub email: Option<String>,
    /// Always present; empty when the order has no items.
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl OrderDocument {
    /// Creates a document with only its identity set.
    pub fn new(order_id: AggregateKey) -> Self {
        Self {
            id: order_id,
            order_id,
            order_date: None,
            order_status: None,
            user_id: None,
            username: None,
            email: None,
            items: Vec::new(),
        }
    }

    /// Returns the key this document is stored under.
    pub fn key(&self) -> AggregateKey {
        self.id
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.order_status = Some(status.into());
        self
    }

    pub fn with_user(
        mut self,
        user_id: i64,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        self.user_id = Some(user_id);
        self.username = Some(username.into());
        self.email = Some(email.into());
        self
    }

    pub fn with_item(mut self, item: OrderItem) -> Self {
        self.items.push(item);
        self
    }
}
