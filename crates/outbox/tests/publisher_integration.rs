//! Integration tests for the outbox publisher over the in-memory store.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{CustomerId, Money, OrderCreatedEvent, OrderItem, OrderStatus};
use outbox::{OutboxPublisher, PublisherConfig};
use store::{InMemoryOrderStore, NewOrder, NewOutboxEvent, OrderStore, OutboxSettings};
use uuid::Uuid;

use bus::{BusError, EventBus, EventHandler, InProcessEventBus, topics};

/// Bus wrapper that fails publishes to one topic a configurable number of
/// times before delegating to the real in-process bus.
struct FlakyBus {
    inner: InProcessEventBus,
    failing_topic: &'static str,
    failures_left: Mutex<u32>,
}

impl FlakyBus {
    fn new(failing_topic: &'static str, failures: u32) -> Self {
        Self {
            inner: InProcessEventBus::new(),
            failing_topic,
            failures_left: Mutex::new(failures),
        }
    }
}

#[async_trait]
impl EventBus for FlakyBus {
    async fn publish(&self, topic: &str, event: serde_json::Value) -> Result<(), BusError> {
        if topic == self.failing_topic {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(BusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected broker failure".to_string(),
                });
            }
        }
        self.inner.publish(topic, event).await
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        self.inner.subscribe(topic, handler).await;
    }
}

struct Recorder {
    events: Mutex<Vec<serde_json::Value>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<serde_json::Value> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn handle(&self, event: &serde_json::Value) -> Result<(), BusError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

fn fast_config() -> PublisherConfig {
    PublisherConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 50,
        max_retries: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(16),
    }
}

fn fast_store() -> Arc<InMemoryOrderStore> {
    Arc::new(InMemoryOrderStore::with_settings(OutboxSettings {
        max_retries: 5,
        lease_window: chrono::Duration::milliseconds(200),
    }))
}

async fn seed_order(store: &InMemoryOrderStore) -> (OrderId, Uuid, String) {
    let order_id = OrderId::new();
    let now = Utc::now();
    let items = vec![OrderItem::new("p-1", 2, Money::from_cents(1000))];
    let payload = OrderCreatedEvent::new(
        order_id,
        CustomerId::new("c-1"),
        &items,
        Money::from_cents(2000),
        OrderStatus::PendingShipment,
        now,
    );
    let event_id = payload.event_id.to_string();

    let outbox_id = Uuid::new_v4();
    store
        .create_order_with_outbox(
            NewOrder {
                id: order_id,
                customer_id: CustomerId::new("c-1"),
                items,
                total_amount: Money::from_cents(2000),
                status: OrderStatus::PendingShipment,
                idempotency_key: None,
                created_at: now,
            },
            NewOutboxEvent {
                id: outbox_id,
                event_type: "order.created".to_string(),
                aggregate_id: order_id,
                payload: serde_json::to_value(&payload).unwrap(),
                created_at: now,
            },
        )
        .await
        .unwrap();

    (order_id, outbox_id, event_id)
}

#[tokio::test]
async fn happy_path_publishes_row_and_records_marker() {
    let store = fast_store();
    let bus = Arc::new(InProcessEventBus::new());
    let recorder = Recorder::new();
    bus.subscribe(topics::ORDER_EVENTS, recorder.clone()).await;

    let (order_id, outbox_id, event_id) = seed_order(&store).await;

    let publisher = OutboxPublisher::new(store.clone(), bus, fast_config());
    publisher.run_once().await;

    let row = store.outbox_record(outbox_id).await.unwrap();
    assert!(row.published);
    assert!(row.published_at.is_some());
    assert!(
        store
            .is_event_processed(&event_id.as_str().into())
            .await
            .unwrap()
    );

    let delivered = recorder.events();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["orderId"], order_id.to_string());
    assert_eq!(delivered[0]["eventType"], "order.created");
}

#[tokio::test]
async fn published_row_is_not_leased_again() {
    let store = fast_store();
    let bus = Arc::new(InProcessEventBus::new());
    let recorder = Recorder::new();
    bus.subscribe(topics::ORDER_EVENTS, recorder.clone()).await;

    seed_order(&store).await;

    let publisher = OutboxPublisher::new(store.clone(), bus, fast_config());
    publisher.run_once().await;
    publisher.run_once().await;

    assert_eq!(recorder.events().len(), 1);
}

#[tokio::test]
async fn failed_publish_schedules_backoff_retries() {
    let store = fast_store();
    let bus = Arc::new(FlakyBus::new(topics::ORDER_EVENTS, 2));
    let recorder = Recorder::new();
    bus.subscribe(topics::ORDER_EVENTS, recorder.clone()).await;

    let (_, outbox_id, event_id) = seed_order(&store).await;
    let publisher = OutboxPublisher::new(store.clone(), bus, fast_config());

    // First failure: retry_count 1, next_retry_at ~1ms out.
    publisher.run_once().await;
    let row = store.outbox_record(outbox_id).await.unwrap();
    assert!(!row.published);
    assert_eq!(row.retry_count, 1);
    assert!(row.next_retry_at.is_some());

    // Second failure once the retry is due.
    tokio::time::sleep(Duration::from_millis(5)).await;
    publisher.run_once().await;
    let row = store.outbox_record(outbox_id).await.unwrap();
    assert_eq!(row.retry_count, 2);

    // Third attempt succeeds.
    tokio::time::sleep(Duration::from_millis(10)).await;
    publisher.run_once().await;
    let row = store.outbox_record(outbox_id).await.unwrap();
    assert!(row.published);
    assert_eq!(recorder.events().len(), 1);
    assert!(
        store
            .is_event_processed(&event_id.as_str().into())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn exhausted_retries_route_to_dead_letter_queue() {
    let store = fast_store();
    let bus = Arc::new(FlakyBus::new(topics::ORDER_EVENTS, u32::MAX));
    let dlq = Recorder::new();
    bus.subscribe(topics::DEAD_LETTER_QUEUE, dlq.clone()).await;

    let (_, outbox_id, event_id) = seed_order(&store).await;
    let publisher = OutboxPublisher::new(store.clone(), bus, fast_config());

    // Failures 1 through 4 schedule retries.
    for expected in 1..=4 {
        publisher.run_once().await;
        let row = store.outbox_record(outbox_id).await.unwrap();
        assert!(!row.published);
        assert_eq!(row.retry_count, expected);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The fifth failure dead-letters the row.
    publisher.run_once().await;

    let row = store.outbox_record(outbox_id).await.unwrap();
    assert!(row.published);
    assert_eq!(row.retry_count, 5);

    let dlq_events = dlq.events();
    assert_eq!(dlq_events.len(), 1);
    let event = &dlq_events[0];
    assert_eq!(event["eventType"], "dlq.event");
    assert_eq!(event["reason"], "Max retries exceeded");
    assert_eq!(event["originalEvent"]["id"], outbox_id.to_string());
    assert!(event["eventId"].as_str().unwrap().starts_with("dlq-"));

    // Abandoned rows get no processed marker.
    assert!(
        !store
            .is_event_processed(&event_id.as_str().into())
            .await
            .unwrap()
    );

    // Nothing further happens on later polls.
    tokio::time::sleep(Duration::from_millis(20)).await;
    publisher.run_once().await;
    assert_eq!(dlq.events().len(), 1);
}

#[tokio::test]
async fn unknown_event_types_route_to_unknown_topic() {
    let store = fast_store();
    let bus = Arc::new(InProcessEventBus::new());
    let recorder = Recorder::new();
    bus.subscribe(topics::UNKNOWN_EVENTS, recorder.clone()).await;

    let order_id = OrderId::new();
    let now = Utc::now();
    store
        .create_order_with_outbox(
            NewOrder {
                id: order_id,
                customer_id: CustomerId::new("c-1"),
                items: vec![OrderItem::new("p-1", 1, Money::from_cents(100))],
                total_amount: Money::from_cents(100),
                status: OrderStatus::PendingShipment,
                idempotency_key: None,
                created_at: now,
            },
            NewOutboxEvent {
                id: Uuid::new_v4(),
                event_type: "order.refunded".to_string(),
                aggregate_id: order_id,
                payload: serde_json::json!({"eventId": "e-unknown"}),
                created_at: now,
            },
        )
        .await
        .unwrap();

    let publisher = OutboxPublisher::new(store.clone(), bus, fast_config());
    publisher.run_once().await;

    assert_eq!(recorder.events().len(), 1);
}

#[tokio::test]
async fn start_is_idempotent_and_stop_joins_the_worker() {
    let store = fast_store();
    let bus = Arc::new(InProcessEventBus::new());
    let recorder = Recorder::new();
    bus.subscribe(topics::ORDER_EVENTS, recorder.clone()).await;

    let publisher = OutboxPublisher::new(store.clone(), bus, fast_config());
    publisher.start();
    publisher.start();
    assert!(publisher.is_running());

    seed_order(&store).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(recorder.events().len(), 1);

    publisher.stop().await;
    assert!(!publisher.is_running());
}
