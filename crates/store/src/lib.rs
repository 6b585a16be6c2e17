//! Transactional persistence for orders, outbox rows, and processed-event
//! markers.
//!
//! The store is the single owner of all rows; every other component mutates
//! state only through the [`OrderStore`] trait. Two realizations are
//! provided: [`PostgresOrderStore`] for production and [`InMemoryOrderStore`]
//! with the same semantics for tests.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{EventId, OrderId};
use domain::OrderStatus;
use uuid::Uuid;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use records::{NewOrder, NewOutboxEvent, OrderRecord, OutboxRecord};

/// Outbox lease tuning shared by both store realizations.
///
/// `max_retries` must match the publisher's setting: the lease predicate
/// admits `retry_count <= max_retries` while the publisher dead-letters on
/// the `max_retries`-th failure. `lease_window` is the visibility timeout a
/// leased row stays hidden for if its publish result is never written (a
/// crashed worker); it should exceed the poll interval plus the slowest
/// publish attempt.
#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub max_retries: i32,
    pub lease_window: Duration,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            lease_window: Duration::seconds(30),
        }
    }
}

/// Transactional API over the three tables.
///
/// Every operation is idempotent with respect to its explicit keys and runs
/// inside a single ACID transaction unless noted otherwise.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Looks up an order by its client-supplied idempotency key.
    async fn find_order_by_idempotency_key(&self, key: &str) -> Result<Option<OrderRecord>>;

    /// Looks up an order by ID.
    async fn find_order_by_id(&self, id: OrderId) -> Result<Option<OrderRecord>>;

    /// Inserts the order and its `order.created` outbox row in one
    /// transaction; aborts atomically on any failure.
    async fn create_order_with_outbox(
        &self,
        order: NewOrder,
        outbox: NewOutboxEvent,
    ) -> Result<OrderRecord>;

    /// Applies a status event exactly once: inside one transaction, fails
    /// with `DuplicateEvent` if the event ID already has a marker, with
    /// `OrderNotFound` if the order is missing, with `InvalidTransition` if
    /// the move is not allowed; otherwise updates the status and inserts the
    /// marker.
    async fn update_status_and_mark_processed(
        &self,
        id: OrderId,
        new_status: OrderStatus,
        event_id: &EventId,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderRecord>;

    /// Leases a batch of due outbox rows (`published = false`,
    /// `retry_count <= max_retries`, `next_retry_at` absent or due), oldest
    /// first. Rows already leased by a peer are skipped; returned rows stay
    /// invisible to other workers until their publish result is written or
    /// the lease window elapses.
    async fn lease_outbox_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>>;

    /// Marks an outbox row published and records the processed-event marker
    /// for its payload event ID, in one transaction.
    async fn mark_published(
        &self,
        id: Uuid,
        event_id: &EventId,
        event_type: &str,
        published_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Stores the retry count and next attempt time for a failed publish.
    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Marks a row published without a marker; the row is being abandoned
    /// to the dead-letter queue.
    async fn mark_published_for_dlq(&self, id: Uuid, published_at: DateTime<Utc>) -> Result<()>;

    /// Returns true if a processed-event marker exists for the event ID.
    async fn is_event_processed(&self, event_id: &EventId) -> Result<bool>;
}
