//! Event shapes published on the bus.
//!
//! All timestamps are RFC3339 UTC; payload fields use camelCase on the wire.

use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use serde::{Deserialize, Serialize};

use crate::item::{CustomerId, OrderItem, ProductId};
use crate::money::Money;
use crate::status::OrderStatus;

/// Event type carried by every `order.created` outbox row and bus payload.
pub const ORDER_CREATED: &str = "order.created";

/// Event type carried by dead-letter events.
pub const DLQ_EVENT: &str = "dlq.event";

/// A line item as it appears inside an `order.created` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price: f64,
}

impl From<&OrderItem> for EventOrderItem {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            price: item.unit_price.to_f64(),
        }
    }
}

/// Published on `order-events` for every accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<EventOrderItem>,
    /// Deterministic scale-2 string, e.g. `"35.00"`.
    pub total_amount: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderCreatedEvent {
    /// Builds the payload for a freshly accepted order, generating a new
    /// payload-level event ID.
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        items: &[OrderItem],
        total_amount: Money,
        status: OrderStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: ORDER_CREATED.to_string(),
            timestamp: created_at,
            order_id,
            customer_id,
            items: items.iter().map(EventOrderItem::from).collect(),
            total_amount: total_amount.to_string(),
            status,
            created_at,
        }
    }
}

/// Consumed from `delivery-events`; emitted by the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub order_id: OrderId,
}

impl DeliveryStatusEvent {
    /// Builds a status event for the given order. `event_type` must be one
    /// of `order.shipped` / `order.delivered`.
    pub fn new(order_id: OrderId, event_type: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: EventId::with_prefix("delivery"),
            event_type: event_type.to_string(),
            timestamp,
            order_id,
        }
    }
}

/// Published on `dead-letter-queue` when an outbox row exhausts its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the abandoned outbox row, opaque to consumers.
    pub original_event: serde_json::Value,
    pub reason: String,
}

impl DlqEvent {
    pub fn new(original_event: serde_json::Value, reason: impl Into<String>) -> Self {
        Self {
            event_id: EventId::with_prefix("dlq"),
            event_type: DLQ_EVENT.to_string(),
            timestamp: Utc::now(),
            original_event,
            reason: reason.into(),
        }
    }
}
