//! Order service: idempotent acceptance and status lifecycle.

use std::sync::Arc;

use chrono::Utc;
use common::{CorrelationId, EventId, OrderId};
use domain::events::ORDER_CREATED;
use domain::{
    CustomerId, InventoryShortfall, Money, OrderCreatedEvent, OrderError, OrderItem, OrderStatus,
};
use inventory::{AvailabilityRequest, InventoryClient};
use store::{NewOrder, NewOutboxEvent, OrderRecord, OrderStore, StoreError};
use uuid::Uuid;

/// A validated order request. Input validation (non-empty customer and
/// items, quantity >= 1, price >= 0) happens at the HTTP boundary;
/// malformed input here is a programming error.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub customer_id: CustomerId,
    pub items: Vec<OrderItem>,
}

/// Service for accepting orders and applying status events.
pub struct OrderService<S, C> {
    store: Arc<S>,
    inventory: Arc<C>,
}

impl<S, C> OrderService<S, C>
where
    S: OrderStore,
    C: InventoryClient,
{
    /// Creates a new order service over the given store and inventory client.
    pub fn new(store: Arc<S>, inventory: Arc<C>) -> Self {
        Self { store, inventory }
    }

    /// Accepts an order.
    ///
    /// A replayed idempotency key returns the previously accepted order in
    /// the same success shape, without re-checking inventory. A fresh
    /// request is gated on a batch availability check; any unavailable item
    /// rejects the whole order with per-item shortfall details. On
    /// acceptance the order and its `order.created` outbox row are written
    /// in one transaction.
    #[tracing::instrument(skip(self, request), fields(
        customer_id = %request.customer_id,
        item_count = request.items.len(),
        correlation_id = correlation_id.map(CorrelationId::as_str),
    ))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        idempotency_key: Option<String>,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<OrderRecord, OrderError> {
        debug_assert!(!request.items.is_empty(), "items validated upstream");

        if let Some(ref key) = idempotency_key {
            let existing = self
                .store
                .find_order_by_idempotency_key(key)
                .await
                .map_err(system_error)?;
            if let Some(order) = existing {
                metrics::counter!("orders_replayed_total").increment(1);
                tracing::info!(order_id = %order.id, "idempotency key replay");
                return Ok(order);
            }
        }

        let batch: Vec<AvailabilityRequest> = request
            .items
            .iter()
            .map(|item| AvailabilityRequest {
                product_id: item.product_id.clone(),
                quantity: item.quantity,
            })
            .collect();

        let results = self
            .inventory
            .check_batch_availability(&batch)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "inventory check failed");
                OrderError::ServiceUnavailable(e.to_string())
            })?;

        let details: Vec<InventoryShortfall> = request
            .items
            .iter()
            .zip(results.iter())
            .filter(|(item, result)| !result.available || result.available_quantity < item.quantity)
            .map(|(item, result)| InventoryShortfall {
                product_id: item.product_id.clone(),
                requested: item.quantity,
                available: result.available_quantity,
            })
            .collect();
        if !details.is_empty() {
            metrics::counter!("orders_rejected_total", "reason" => "insufficient_inventory")
                .increment(1);
            return Err(OrderError::InsufficientInventory { details });
        }

        let total_amount: Money = request.items.iter().map(OrderItem::line_total).sum();
        let order_id = OrderId::new();
        let now = Utc::now();

        let payload = OrderCreatedEvent::new(
            order_id,
            request.customer_id.clone(),
            &request.items,
            total_amount,
            OrderStatus::PendingShipment,
            now,
        );
        let payload_json = serde_json::to_value(&payload).map_err(system_error)?;

        let order = self
            .store
            .create_order_with_outbox(
                NewOrder {
                    id: order_id,
                    customer_id: request.customer_id,
                    items: request.items,
                    total_amount,
                    status: OrderStatus::PendingShipment,
                    idempotency_key,
                    created_at: now,
                },
                NewOutboxEvent {
                    id: Uuid::new_v4(),
                    event_type: ORDER_CREATED.to_string(),
                    aggregate_id: order_id,
                    payload: payload_json,
                    created_at: now,
                },
            )
            .await
            .map_err(system_error)?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id, total_amount = %order.total_amount, "order accepted");
        Ok(order)
    }

    /// Applies a status event to an order exactly once.
    ///
    /// Runs entirely inside the store transaction: duplicate event IDs,
    /// missing orders, and disallowed transitions fail without mutating any
    /// row. The processed-event marker stores the `order.<status>` event
    /// type derived from the new status.
    #[tracing::instrument(skip(self), fields(
        correlation_id = correlation_id.map(CorrelationId::as_str),
    ))]
    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        event_id: EventId,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<OrderRecord, OrderError> {
        let result = self
            .store
            .update_status_and_mark_processed(
                order_id,
                new_status,
                &event_id,
                new_status.event_type(),
                Utc::now(),
            )
            .await;

        match result {
            Ok(order) => {
                metrics::counter!("order_status_updates_total", "status" => new_status.as_str())
                    .increment(1);
                tracing::info!(%order_id, status = %new_status, "order status updated");
                Ok(order)
            }
            Err(StoreError::DuplicateEvent(id)) => Err(OrderError::DuplicateEvent(id)),
            Err(StoreError::OrderNotFound(id)) => Err(OrderError::NotFound(id)),
            Err(StoreError::InvalidTransition { from, to }) => {
                tracing::warn!(%order_id, %from, %to, "invalid status transition");
                Err(OrderError::InvalidTransition { from, to })
            }
            Err(e) => Err(system_error(e)),
        }
    }

    /// Loads an order by ID.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>, OrderError> {
        self.store
            .find_order_by_id(order_id)
            .await
            .map_err(system_error)
    }
}

/// Collapses a systemic fault into the generic client-facing error while
/// keeping the detail for logs.
fn system_error(e: impl std::fmt::Display) -> OrderError {
    tracing::error!(error = %e, "system fault during order operation");
    OrderError::ServiceUnavailable("internal failure".to_string())
}
