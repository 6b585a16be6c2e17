//! Domain layer for the order intake and lifecycle service.
//!
//! This crate provides the shared value types the other components build on:
//! - the forward-only order status machine
//! - money and order-item value objects
//! - the event shapes published on the bus
//! - the order error taxonomy with stable wire codes

pub mod error;
pub mod events;
pub mod item;
pub mod money;
pub mod status;

pub use error::{InventoryShortfall, OrderError};
pub use events::{DeliveryStatusEvent, DlqEvent, EventOrderItem, OrderCreatedEvent};
pub use item::{CustomerId, OrderItem, ProductId};
pub use money::Money;
pub use status::OrderStatus;
