//! Topic names used by the core.

/// Accepted orders (`order.created` payloads).
pub const ORDER_EVENTS: &str = "order-events";

/// Shipment / delivery notifications (`order.shipped`, `order.delivered`).
pub const DELIVERY_EVENTS: &str = "delivery-events";

/// Outbox rows abandoned after exhausting their retries.
pub const DEAD_LETTER_QUEUE: &str = "dead-letter-queue";

/// Outbox rows whose event type matches no known route.
pub const UNKNOWN_EVENTS: &str = "unknown-events";
