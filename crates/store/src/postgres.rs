use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use domain::{CustomerId, Money, OrderItem, OrderStatus};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    NewOrder, NewOutboxEvent, OrderRecord, OrderStore, OutboxRecord, OutboxSettings, Result,
    StoreError,
};

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    settings: OutboxSettings,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool, settings: OutboxSettings) -> Self {
        Self { pool, settings }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        let items_json: serde_json::Value = row.try_get("items")?;
        let items: Vec<OrderItem> = serde_json::from_value(items_json)?;
        let status_str: String = row.try_get("status")?;
        let status = OrderStatus::from_str(&status_str)
            .map_err(|e| StoreError::CorruptRow(e.to_string()))?;

        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
            items,
            total_amount: Money::from_cents(row.try_get("total_amount_cents")?),
            status,
            idempotency_key: row.try_get("idempotency_key")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxRecord> {
        Ok(OutboxRecord {
            id: row.try_get("id")?,
            event_type: row.try_get("event_type")?,
            aggregate_id: OrderId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            payload: row.try_get("payload")?,
            published: row.try_get("published")?,
            retry_count: row.try_get("retry_count")?,
            next_retry_at: row.try_get("next_retry_at")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
        })
    }

    async fn insert_marker(
        tx: &mut Transaction<'_, Postgres>,
        event_id: &EventId,
        event_type: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, event_type, processed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id.as_str())
        .bind(event_type)
        .bind(processed_at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn find_order_by_idempotency_key(&self, key: &str) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, items, total_amount_cents, status,
                   idempotency_key, created_at, updated_at
            FROM orders
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn find_order_by_id(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, items, total_amount_cents, status,
                   idempotency_key, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn create_order_with_outbox(
        &self,
        order: NewOrder,
        outbox: NewOutboxEvent,
    ) -> Result<OrderRecord> {
        let items_json = serde_json::to_value(&order.items)?;

        let mut tx = self.pool.begin().await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO orders
                (id, customer_id, items, total_amount_cents, status,
                 idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.customer_id.as_str())
        .bind(&items_json)
        .bind(order.total_amount.cents())
        .bind(order.status.as_str())
        .bind(&order.idempotency_key)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            // Two clients racing on the same idempotency key: the loser's
            // insert hits the unique index; hand back the winner's order.
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_idempotency_key_idx")
                && let Some(ref key) = order.idempotency_key
            {
                drop(tx);
                if let Some(existing) = self.find_order_by_idempotency_key(key).await? {
                    return Ok(existing);
                }
            }
            return Err(StoreError::Database(e));
        }

        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, event_type, aggregate_id, payload, published, retry_count,
                 next_retry_at, created_at, published_at)
            VALUES ($1, $2, $3, $4, FALSE, 0, NULL, $5, NULL)
            "#,
        )
        .bind(outbox.id)
        .bind(&outbox.event_type)
        .bind(outbox.aggregate_id.as_uuid())
        .bind(&outbox.payload)
        .bind(outbox.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order.into_record())
    }

    async fn update_status_and_mark_processed(
        &self,
        id: OrderId,
        new_status: OrderStatus,
        event_id: &EventId,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderRecord> {
        let mut tx = self.pool.begin().await?;

        let already: Option<PgRow> =
            sqlx::query("SELECT event_id FROM processed_events WHERE event_id = $1")
                .bind(event_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        if already.is_some() {
            return Err(StoreError::DuplicateEvent(event_id.clone()));
        }

        // Per-order row lock serializes concurrent status updates.
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, items, total_amount_cents, status,
                   idempotency_key, created_at, updated_at
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let order = match row {
            Some(row) => Self::row_to_order(row)?,
            None => return Err(StoreError::OrderNotFound(id)),
        };

        if !order.status.can_transition_to(new_status) {
            return Err(StoreError::InvalidTransition {
                from: order.status,
                to: new_status,
            });
        }

        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(new_status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let inserted = Self::insert_marker(&mut tx, event_id, event_type, now).await?;
        if !inserted {
            // A concurrent transaction won the marker insert.
            return Err(StoreError::DuplicateEvent(event_id.clone()));
        }

        tx.commit().await?;

        Ok(OrderRecord {
            status: new_status,
            updated_at: now,
            ..order
        })
    }

    async fn lease_outbox_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, payload, published, retry_count,
                   next_retry_at, created_at, published_at
            FROM outbox_events
            WHERE published = FALSE
              AND retry_count <= $1
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY created_at
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.settings.max_retries)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let records: Vec<OutboxRecord> = rows
            .into_iter()
            .map(Self::row_to_outbox)
            .collect::<Result<_>>()?;

        if records.is_empty() {
            return Ok(records);
        }

        // Visibility stamp: keep the batch invisible to peers for the lease
        // window so no row lock is held across the bus publish. The publish
        // result write supersedes the stamp; a crashed worker's rows
        // resurface once the window elapses.
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        sqlx::query("UPDATE outbox_events SET next_retry_at = $2 WHERE id = ANY($1)")
            .bind(&ids)
            .bind(now + self.settings.lease_window)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(records)
    }

    async fn mark_published(
        &self,
        id: Uuid,
        event_id: &EventId,
        event_type: &str,
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE outbox_events SET published = TRUE, published_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(published_at)
        .execute(&mut *tx)
        .await?;

        // ON CONFLICT keeps a republish after a partially-failed
        // mark_published idempotent.
        Self::insert_marker(&mut tx, event_id, event_type, published_at).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET retry_count = $2, next_retry_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(retry_count)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_published_for_dlq(&self, id: Uuid, published_at: DateTime<Utc>) -> Result<()> {
        // Records the final failure ordinal alongside the abandonment; no
        // processed-event marker is written for dead-lettered rows.
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET published = TRUE, published_at = $2, retry_count = retry_count + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(published_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_event_processed(&self, event_id: &EventId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM processed_events WHERE event_id = $1)")
                .bind(event_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }
}
