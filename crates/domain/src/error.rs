//! Order error taxonomy.

use common::{EventId, OrderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::ProductId;
use crate::status::OrderStatus;

/// Per-item detail attached to an insufficient-inventory rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryShortfall {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

/// Errors surfaced by order operations.
///
/// Business errors flow as values across component boundaries; each variant
/// maps to a stable wire code via [`OrderError::code`]. Systemic faults
/// (store or collaborator down) collapse into `ServiceUnavailable` for
/// clients and keep their detail in logs.
#[derive(Debug, Error)]
pub enum OrderError {
    /// One or more items cannot be fulfilled from current inventory.
    #[error("insufficient inventory for {} item(s)", details.len())]
    InsufficientInventory { details: Vec<InventoryShortfall> },

    /// The inventory collaborator, circuit breaker, or store failed.
    #[error("inventory service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The order does not exist.
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// The requested status transition is not allowed.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The triggering event was already applied.
    #[error("event {0} already processed")]
    DuplicateEvent(EventId),

    /// Malformed input, rejected at the boundary.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl OrderError {
    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            OrderError::ServiceUnavailable(_) => "INVENTORY_SERVICE_UNAVAILABLE",
            OrderError::NotFound(_) => "ORDER_NOT_FOUND",
            OrderError::InvalidTransition { .. } => "INVALID_STATUS_TRANSITION",
            OrderError::DuplicateEvent(_) => "DUPLICATE_EVENT",
            OrderError::Validation(_) => "VALIDATION_ERROR",
        }
    }
}
