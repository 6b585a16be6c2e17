//! Polling outbox publisher worker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use common::EventId;
use domain::DlqEvent;
use futures_util::future::join_all;
use store::{OrderStore, OutboxRecord};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use bus::{EventBus, topics};

/// Publisher tuning.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Steady tick between polls.
    pub poll_interval: Duration,
    /// Max rows leased per poll.
    pub batch_size: usize,
    /// Ordinal failure count that routes a row to the DLQ.
    pub max_retries: i32,
    /// First retry delay; doubles per failure.
    pub base_delay: Duration,
    /// Ceiling on the retry delay.
    pub max_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_size: 50,
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1600),
        }
    }
}

/// Retry delay for the given failure ordinal:
/// `min(max_delay, base_delay * 2^(retry_count - 1))`.
/// With defaults this yields 100, 200, 400, 800, 1600 ms.
pub fn backoff_delay(config: &PublisherConfig, retry_count: i32) -> Duration {
    let exponent = retry_count.saturating_sub(1).clamp(0, 31) as u32;
    let delay = config
        .base_delay
        .saturating_mul(2u32.saturating_pow(exponent));
    delay.min(config.max_delay)
}

/// Topic an outbox row's event type routes to.
pub fn route_topic(event_type: &str) -> &'static str {
    match event_type {
        domain::events::ORDER_CREATED => topics::ORDER_EVENTS,
        "order.shipped" | "order.delivered" => topics::DELIVERY_EVENTS,
        _ => topics::UNKNOWN_EVENTS,
    }
}

/// Background worker that leases outbox batches and publishes them.
///
/// Multiple publishers may run over the same store without coordination:
/// the skip-locked lease keeps each row with at most one worker per poll
/// cycle, and a failed row is released with its retry schedule updated. A
/// single worker never runs two batches concurrently; rows within a batch
/// are published in parallel.
pub struct OutboxPublisher<S, B> {
    store: Arc<S>,
    bus: Arc<B>,
    config: PublisherConfig,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S, B> OutboxPublisher<S, B>
where
    S: OrderStore + 'static,
    B: EventBus + 'static,
{
    /// Creates a stopped publisher.
    pub fn new(store: Arc<S>, bus: Arc<B>, config: PublisherConfig) -> Self {
        Self {
            store,
            bus,
            config,
            shutdown: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Starts the poll loop. Calling start on a running publisher is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        *worker = Some(tokio::spawn(async move {
            tracing::info!(
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                batch_size = config.batch_size,
                "outbox publisher started"
            );

            let mut tick = tokio::time::interval(config.poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("outbox publisher shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        run_batch(&store, &bus, &config).await;
                    }
                }
            }

            tracing::info!("outbox publisher stopped");
        }));
    }

    /// Returns true while the poll loop task is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Signals the poll loop to stop at its next safe boundary and waits
    /// for it to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "outbox publisher task panicked");
            }
        }
    }

    /// Leases and publishes one batch. The poll loop calls this every tick;
    /// tests call it directly for deterministic draining.
    pub async fn run_once(&self) {
        run_batch(&self.store, &self.bus, &self.config).await;
    }
}

async fn run_batch<S, B>(store: &Arc<S>, bus: &Arc<B>, config: &PublisherConfig)
where
    S: OrderStore,
    B: EventBus,
{
    let now = Utc::now();
    let batch = match store.lease_outbox_batch(config.batch_size, now).await {
        Ok(batch) => batch,
        Err(e) => {
            // Loop-level fault: log and let the next tick retry.
            tracing::error!(error = %e, "outbox lease failed");
            return;
        }
    };

    if batch.is_empty() {
        return;
    }

    tracing::debug!(rows = batch.len(), "publishing outbox batch");
    join_all(
        batch
            .into_iter()
            .map(|row| publish_one(store, bus, config, row)),
    )
    .await;
}

async fn publish_one<S, B>(store: &Arc<S>, bus: &Arc<B>, config: &PublisherConfig, row: OutboxRecord)
where
    S: OrderStore,
    B: EventBus,
{
    let topic = route_topic(&row.event_type);

    match bus.publish(topic, row.payload.clone()).await {
        Ok(()) => {
            let event_id = match row.payload_event_id() {
                Some(id) => EventId::from(id),
                None => {
                    // Rows are inserted with a payload eventId; fall back to
                    // the row id rather than lose the marker.
                    tracing::warn!(row_id = %row.id, "outbox payload missing eventId");
                    EventId::from(row.id.to_string())
                }
            };

            if let Err(e) = store
                .mark_published(row.id, &event_id, &row.event_type, Utc::now())
                .await
            {
                // Row stays unpublished and will be re-leased; downstream
                // consumers deduplicate by payload eventId.
                tracing::error!(row_id = %row.id, error = %e, "mark_published failed");
                return;
            }

            metrics::counter!("outbox_published_total", "topic" => topic).increment(1);
            tracing::debug!(row_id = %row.id, topic, "outbox row published");
        }
        Err(publish_err) => {
            let new_retry_count = row.retry_count + 1;

            if new_retry_count >= config.max_retries {
                move_to_dlq(store, bus, row, publish_err.to_string()).await;
            } else {
                let delay = backoff_delay(config, new_retry_count);
                let next_retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());

                if let Err(e) = store
                    .schedule_retry(row.id, new_retry_count, next_retry_at)
                    .await
                {
                    tracing::error!(row_id = %row.id, error = %e, "schedule_retry failed");
                    return;
                }

                metrics::counter!("outbox_retries_total").increment(1);
                tracing::warn!(
                    row_id = %row.id,
                    retry_count = new_retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %publish_err,
                    "outbox publish failed, retry scheduled"
                );
            }
        }
    }
}

async fn move_to_dlq<S, B>(store: &Arc<S>, bus: &Arc<B>, row: OutboxRecord, reason_detail: String)
where
    S: OrderStore,
    B: EventBus,
{
    // The row is marked published first; if the DLQ publish then fails the
    // loss is logged and the outbox table keeps the audit trail.
    if let Err(e) = store.mark_published_for_dlq(row.id, Utc::now()).await {
        tracing::error!(row_id = %row.id, error = %e, "mark_published_for_dlq failed");
        return;
    }

    let snapshot = match serde_json::to_value(&row) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(row_id = %row.id, error = %e, "outbox row snapshot failed");
            serde_json::json!({ "id": row.id.to_string() })
        }
    };
    let dlq_event = DlqEvent::new(snapshot, "Max retries exceeded");

    metrics::counter!("outbox_dlq_total").increment(1);
    tracing::error!(
        row_id = %row.id,
        event_type = %row.event_type,
        detail = %reason_detail,
        "outbox row moved to dead-letter queue"
    );

    match serde_json::to_value(&dlq_event) {
        Ok(payload) => {
            if let Err(e) = bus.publish(topics::DEAD_LETTER_QUEUE, payload).await {
                metrics::counter!("outbox_dlq_publish_failures_total").increment(1);
                tracing::error!(row_id = %row.id, error = %e, "dead-letter publish failed");
            }
        }
        Err(e) => {
            tracing::error!(row_id = %row.id, error = %e, "dead-letter event serialization failed");
        }
    }
}
