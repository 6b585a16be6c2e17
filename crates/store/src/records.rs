//! Row types owned by the store.

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{CustomerId, Money, OrderItem, OrderStatus};
use serde::Serialize;
use uuid::Uuid;

/// A persisted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: OrderId,
    pub customer_id: CustomerId,
    /// Ordered list of line items, immutable after acceptance.
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting an order. `updated_at` starts equal to `created_at`.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Materializes the record this input produces on successful insert.
    pub fn into_record(self) -> OrderRecord {
        OrderRecord {
            id: self.id,
            customer_id: self.customer_id,
            items: self.items,
            total_amount: self.total_amount,
            status: self.status,
            idempotency_key: self.idempotency_key,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// A persisted outbox row. Serializes camelCase so a row snapshot can be
/// embedded verbatim as a DLQ event's `originalEvent`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_id: OrderId,
    /// The event body exactly as it will appear on the bus, including the
    /// payload-level `eventId`.
    pub payload: serde_json::Value,
    pub published: bool,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// The payload-level event ID, if the payload carries one.
    pub fn payload_event_id(&self) -> Option<&str> {
        self.payload.get("eventId").and_then(|v| v.as_str())
    }
}

/// Input for inserting an outbox row alongside its aggregate write.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_id: OrderId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    /// Materializes the unpublished record this input produces.
    pub fn into_record(self) -> OutboxRecord {
        OutboxRecord {
            id: self.id,
            event_type: self.event_type,
            aggregate_id: self.aggregate_id,
            payload: self.payload,
            published: false,
            retry_count: 0,
            next_retry_at: None,
            created_at: self.created_at,
            published_at: None,
        }
    }
}
