//! Order acceptance and lifecycle.
//!
//! [`OrderService`] accepts orders idempotently, gates them on the
//! inventory client, and writes the order plus its `order.created` outbox
//! row in one transaction. Inbound status events are applied exactly once
//! through the store, driven by the [`StatusConsumer`] subscribed to
//! `delivery-events`.

pub mod consumer;
pub mod service;

pub use consumer::StatusConsumer;
pub use service::{CreateOrderRequest, OrderService};
