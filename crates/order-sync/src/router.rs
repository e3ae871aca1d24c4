//! Event routing: what a change event means for the order aggregate.

use change_stream::{ChangeEvent, Operation};
use common::{AggregateKey, EntityKey};

/// Why an event produced no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Tombstone, or a value without a change payload.
    NoPayload,
    /// Table truncation. There is no row to rebuild from.
    Truncate,
    /// The image the operation needs (before for deletes, after otherwise) is absent.
    MissingImage,
    /// The image has no usable aggregate key.
    MissingKey,
    /// A change to a referenced entity while fan-out is disabled.
    SecondaryEntity,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPayload => "no_payload",
            Self::Truncate => "truncate",
            Self::MissingImage => "missing_image",
            Self::MissingKey => "missing_key",
            Self::SecondaryEntity => "secondary_entity",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with the document of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Rebuild from the relational store and upsert.
    Upsert,
    /// Remove the document.
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub key: AggregateKey,
}

/// Routing decision for one change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Skip(SkipReason),
    Action(Action),
    /// Rebuild every aggregate that references this secondary entity.
    FanOut(EntityKey),
}

impl Route {
    pub fn upsert(key: AggregateKey) -> Self {
        Self::Action(Action {
            kind: ActionKind::Upsert,
            key,
        })
    }

    pub fn delete(key: AggregateKey) -> Self {
        Self::Action(Action {
            kind: ActionKind::Delete,
            key,
        })
    }
}

/// Table and column names the router works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    /// Root table of the aggregate. Deletes here remove the document.
    pub primary_table: String,
    /// Column holding the aggregate key, in the root table and its children.
    pub key_field: String,
    /// Table of an entity referenced by aggregates but not owned by them.
    pub secondary_table: String,
    /// Column holding the secondary entity's id.
    pub secondary_key_field: String,
    /// Whether secondary entity changes rebuild the aggregates referencing them.
    pub fan_out_secondary: bool,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            primary_table: "orders".to_string(),
            key_field: "order_id".to_string(),
            secondary_table: "users".to_string(),
            secondary_key_field: "user_id".to_string(),
            fan_out_secondary: false,
        }
    }
}

/// Pure decision function from change events to routes.
///
/// Rules, in order:
/// 1. truncations are skipped;
/// 2. the before-image is used for deletes, the after-image otherwise;
/// 3. secondary-table events fan out when enabled and are skipped otherwise;
/// 4. events without an aggregate key are skipped;
/// 5. deletes on the primary table delete the document;
/// 6. anything else rebuilds the aggregate. This includes deletes on child
///    tables: losing a line item changes the order, it does not remove it.
#[derive(Debug, Clone, Default)]
pub struct EventRouter {
    table: RoutingTable,
}

impl EventRouter {
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    pub fn route(&self, event: &ChangeEvent) -> Route {
        if event.operation == Operation::Truncate {
            return Route::Skip(SkipReason::Truncate);
        }

        let Some(image) = event.image() else {
            return Route::Skip(SkipReason::MissingImage);
        };

        if event.table == self.table.secondary_table {
            if !self.table.fan_out_secondary {
                return Route::Skip(SkipReason::SecondaryEntity);
            }
            return match image
                .get(&self.table.secondary_key_field)
                .and_then(EntityKey::from_json)
            {
                Some(entity) => Route::FanOut(entity),
                None => Route::Skip(SkipReason::MissingKey),
            };
        }

        let Some(key) = image
            .get(&self.table.key_field)
            .and_then(AggregateKey::from_json)
        else {
            return Route::Skip(SkipReason::MissingKey);
        };

        if event.operation.is_delete() && event.table == self.table.primary_table {
            Route::delete(key)
        } else {
            Route::upsert(key)
        }
    }
}
