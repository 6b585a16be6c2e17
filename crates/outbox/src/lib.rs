//! Transactional outbox publisher.
//!
//! Drains unpublished outbox rows in batches, publishes each row's payload
//! on the event bus, and records the outcome: a processed-event marker on
//! success, an exponential-backoff retry schedule on failure, and
//! dead-letter routing once the retries are exhausted.

pub mod publisher;

pub use publisher::{OutboxPublisher, PublisherConfig, backoff_delay, route_topic};
