use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use domain::OrderStatus;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    NewOrder, NewOutboxEvent, OrderRecord, OrderStore, OutboxRecord, OutboxSettings, Result,
    StoreError,
};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, OrderRecord>,
    outbox: Vec<OutboxRecord>,
    processed: HashMap<String, (String, DateTime<Utc>)>,
}

/// In-memory order store implementation for testing.
///
/// This implementation keeps all rows in memory and provides the same
/// semantics as the PostgreSQL implementation, including the lease
/// visibility window.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
    settings: OutboxSettings,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store with default outbox settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with specific outbox settings.
    pub fn with_settings(settings: OutboxSettings) -> Self {
        Self {
            state: Arc::default(),
            settings,
        }
    }

    /// Returns all outbox rows, in insertion order.
    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state.read().await.outbox.clone()
    }

    /// Returns a single outbox row by ID.
    pub async fn outbox_record(&self, id: Uuid) -> Option<OutboxRecord> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Returns the number of processed-event markers.
    pub async fn marker_count(&self) -> usize {
        self.state.read().await.processed.len()
    }

    /// Returns the number of persisted orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_order_by_idempotency_key(&self, key: &str) -> Result<Option<OrderRecord>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_order_by_id(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn create_order_with_outbox(
        &self,
        order: NewOrder,
        outbox: NewOutboxEvent,
    ) -> Result<OrderRecord> {
        let mut state = self.state.write().await;

        if let Some(ref key) = order.idempotency_key
            && let Some(existing) = state
                .orders
                .values()
                .find(|o| o.idempotency_key.as_deref() == Some(key.as_str()))
        {
            return Ok(existing.clone());
        }

        let record = order.into_record();
        state.orders.insert(record.id, record.clone());
        state.outbox.push(outbox.into_record());
        Ok(record)
    }

    async fn update_status_and_mark_processed(
        &self,
        id: OrderId,
        new_status: OrderStatus,
        event_id: &EventId,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderRecord> {
        let mut state = self.state.write().await;

        if state.processed.contains_key(event_id.as_str()) {
            return Err(StoreError::DuplicateEvent(event_id.clone()));
        }

        let current = match state.orders.get(&id) {
            Some(order) => order.status,
            None => return Err(StoreError::OrderNotFound(id)),
        };

        if !current.can_transition_to(new_status) {
            return Err(StoreError::InvalidTransition {
                from: current,
                to: new_status,
            });
        }

        let order = state.orders.get_mut(&id).expect("checked above");
        order.status = new_status;
        order.updated_at = now;
        let updated = order.clone();

        state.processed.insert(
            event_id.as_str().to_string(),
            (event_type.to_string(), now),
        );

        Ok(updated)
    }

    async fn lease_outbox_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>> {
        let mut state = self.state.write().await;
        let max_retries = self.settings.max_retries;
        let claim_until = now + self.settings.lease_window;

        let mut due: Vec<usize> = state
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                !r.published
                    && r.retry_count <= max_retries
                    && r.next_retry_at.is_none_or(|t| t <= now)
            })
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| state.outbox[i].created_at);
        due.truncate(limit);

        let mut leased = Vec::with_capacity(due.len());
        for i in due {
            let snapshot = state.outbox[i].clone();
            state.outbox[i].next_retry_at = Some(claim_until);
            leased.push(snapshot);
        }
        Ok(leased)
    }

    async fn mark_published(
        &self,
        id: Uuid,
        event_id: &EventId,
        event_type: &str,
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if let Some(row) = state.outbox.iter_mut().find(|r| r.id == id) {
            row.published = true;
            row.published_at = Some(published_at);
        }
        state
            .processed
            .entry(event_id.as_str().to_string())
            .or_insert((event_type.to_string(), published_at));

        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if let Some(row) = state.outbox.iter_mut().find(|r| r.id == id) {
            row.retry_count = retry_count;
            row.next_retry_at = Some(next_retry_at);
        }
        Ok(())
    }

    async fn mark_published_for_dlq(&self, id: Uuid, published_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;

        if let Some(row) = state.outbox.iter_mut().find(|r| r.id == id) {
            row.published = true;
            row.published_at = Some(published_at);
            row.retry_count += 1;
        }
        Ok(())
    }

    async fn is_event_processed(&self, event_id: &EventId) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .processed
            .contains_key(event_id.as_str()))
    }
}
