//! Shared identifier types used across the order service.

pub mod types;

pub use types::{CorrelationId, EventId, OrderId};
