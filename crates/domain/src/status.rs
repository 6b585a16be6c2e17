//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Transitions are forward-only:
/// ```text
/// Pending Shipment ──► Shipped ──► Delivered
/// ```
/// No other transition is permitted; `Delivered` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order accepted, waiting for the shipment notification.
    #[default]
    #[serde(rename = "Pending Shipment")]
    PendingShipment,

    /// Shipment confirmed by the delivery collaborator.
    Shipped,

    /// Delivery confirmed (terminal status).
    Delivered,
}

impl OrderStatus {
    /// Returns true if an order in this status may move to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::PendingShipment, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        )
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered)
    }

    /// Returns the status name as presented to clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingShipment => "Pending Shipment",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
        }
    }

    /// Returns the event type derived from this status: the status name
    /// lowercased with spaces replaced by underscores, under the `order.`
    /// namespace (e.g. `order.pending_shipment`, `order.shipped`).
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderStatus::PendingShipment => "order.pending_shipment",
            OrderStatus::Shipped => "order.shipped",
            OrderStatus::Delivered => "order.delivered",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(pub String);

impl std::fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown order status: {}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl std::str::FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending Shipment" => Ok(OrderStatus::PendingShipment),
            "Shipped" => Ok(OrderStatus::Shipped),
            "Delivered" => Ok(OrderStatus::Delivered),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}
