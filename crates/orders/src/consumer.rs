//! Delivery-events subscriber.

use std::sync::Arc;

use async_trait::async_trait;
use common::{EventId, OrderId};
use domain::{OrderError, OrderStatus};
use inventory::InventoryClient;
use store::OrderStore;
use uuid::Uuid;

use bus::{BusError, EventHandler};

use crate::service::OrderService;

/// Translates `order.shipped` / `order.delivered` events into status
/// updates on the order service.
///
/// Malformed events are logged and dropped; `DUPLICATE_EVENT`,
/// `ORDER_NOT_FOUND`, and `INVALID_STATUS_TRANSITION` are non-fatal
/// observations. The consumer never retries: the in-process bus is
/// at-least-once and the store applies each event ID at most once.
pub struct StatusConsumer<S, C> {
    service: Arc<OrderService<S, C>>,
}

impl<S, C> StatusConsumer<S, C>
where
    S: OrderStore,
    C: InventoryClient,
{
    /// Creates a consumer over the given order service.
    pub fn new(service: Arc<OrderService<S, C>>) -> Self {
        Self { service }
    }

    fn parse(event: &serde_json::Value) -> Option<(OrderId, OrderStatus, EventId)> {
        let event_type = event.get("eventType")?.as_str()?;
        let status = match event_type {
            "order.shipped" => OrderStatus::Shipped,
            "order.delivered" => OrderStatus::Delivered,
            _ => return None,
        };
        let order_id = event
            .get("orderId")?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(OrderId::from_uuid)?;
        let event_id = EventId::from(event.get("eventId")?.as_str()?);
        Some((order_id, status, event_id))
    }
}

#[async_trait]
impl<S, C> EventHandler for StatusConsumer<S, C>
where
    S: OrderStore,
    C: InventoryClient,
{
    fn name(&self) -> &'static str {
        "status-consumer"
    }

    async fn handle(&self, event: &serde_json::Value) -> Result<(), BusError> {
        let Some((order_id, new_status, event_id)) = Self::parse(event) else {
            metrics::counter!("status_events_dropped_total").increment(1);
            tracing::warn!(?event, "dropping malformed delivery event");
            return Ok(());
        };

        match self
            .service
            .update_order_status(order_id, new_status, event_id.clone(), None)
            .await
        {
            Ok(order) => {
                tracing::info!(%order_id, status = %order.status, "status event applied");
            }
            Err(OrderError::DuplicateEvent(_)) => {
                // Idempotent success: the event was applied earlier.
                tracing::debug!(%order_id, event_id = %event_id, "duplicate status event");
            }
            Err(OrderError::NotFound(_)) => {
                tracing::warn!(%order_id, event_id = %event_id, "status event for unknown order");
            }
            Err(OrderError::InvalidTransition { from, to }) => {
                tracing::warn!(%order_id, %from, %to, "status event with invalid transition");
            }
            Err(e) => {
                tracing::error!(%order_id, error = %e, "status event failed");
            }
        }

        Ok(())
    }
}
