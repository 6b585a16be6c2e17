//! In-process topic publish/subscribe.
//!
//! The publisher and the status consumer communicate only through the
//! [`EventBus`] trait, which abstracts whatever broker realizes it. The
//! in-process realization delivers synchronously to each subscriber in
//! registration order (per-topic FIFO from a single publisher) and isolates
//! subscriber faults so one failing handler cannot abort the fan-out.
//! Delivery is at-least-once to every subscriber registered at publish time;
//! consumers deduplicate by payload event ID.

pub mod in_process;
pub mod topics;

use async_trait::async_trait;
use thiserror::Error;

pub use in_process::InProcessEventBus;

/// Errors surfaced by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus could not accept the event for the topic.
    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// A subscriber could not process the delivered event.
    #[error("handler failed: {0}")]
    HandlerFailed(String),
}

/// A topic subscriber.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name, used in logs when a delivery fails.
    fn name(&self) -> &'static str;

    /// Processes one delivered event. Errors are isolated by the bus.
    async fn handle(&self, event: &serde_json::Value) -> Result<(), BusError>;
}

/// Topic-based publish/subscribe contract.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Delivers `event` to every current subscriber of `topic`. Delivery is
    /// synchronous to the publisher; a subscriber failure is logged and does
    /// not abort the fan-out.
    async fn publish(&self, topic: &str, event: serde_json::Value) -> Result<(), BusError>;

    /// Registers a handler for `topic`. Multiple handlers per topic are
    /// allowed; subscription order is the delivery order.
    async fn subscribe(&self, topic: &str, handler: std::sync::Arc<dyn EventHandler>);
}
