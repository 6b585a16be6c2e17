//! In-memory bus realization.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{BusError, EventBus, EventHandler};

/// Topic → ordered subscriber list, delivered synchronously.
#[derive(Clone, Default)]
pub struct InProcessEventBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>>,
}

impl InProcessEventBus {
    /// Creates a new bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of subscribers for a topic.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn publish(&self, topic: &str, event: serde_json::Value) -> Result<(), BusError> {
        // Snapshot the list so a handler subscribing mid-delivery cannot
        // mutate the fan-out underway.
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscribers
            .read()
            .await
            .get(topic)
            .cloned()
            .unwrap_or_default();

        metrics::counter!("bus_published_total", "topic" => topic.to_string()).increment(1);

        for handler in handlers {
            if let Err(e) = handler.handle(&event).await {
                metrics::counter!("bus_handler_failures_total", "topic" => topic.to_string())
                    .increment(1);
                tracing::warn!(
                    topic,
                    handler = handler.name(),
                    error = %e,
                    "subscriber failed, continuing fan-out"
                );
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        self.subscribers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingHandler {
        label: &'static str,
        log: Arc<Mutex<Vec<(&'static str, serde_json::Value)>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn handle(&self, event: &serde_json::Value) -> Result<(), BusError> {
            self.log.lock().unwrap().push((self.label, event.clone()));
            if self.fail {
                return Err(BusError::HandlerFailed("boom".into()));
            }
            Ok(())
        }
    }

    fn handler(
        label: &'static str,
        log: &Arc<Mutex<Vec<(&'static str, serde_json::Value)>>>,
        fail: bool,
    ) -> Arc<dyn EventHandler> {
        Arc::new(RecordingHandler {
            label,
            log: Arc::clone(log),
            fail,
        })
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers_in_order() {
        let bus = InProcessEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("t", handler("first", &log, false)).await;
        bus.subscribe("t", handler("second", &log, false)).await;

        bus.publish("t", serde_json::json!({"n": 1})).await.unwrap();

        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "first");
        assert_eq!(entries[1].0, "second");
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_abort_fan_out() {
        let bus = InProcessEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("t", handler("bad", &log, true)).await;
        bus.subscribe("t", handler("good", &log, false)).await;

        let result = bus.publish("t", serde_json::json!({})).await;

        assert!(result.is_ok());
        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0, "good");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InProcessEventBus::new();
        assert!(bus.publish("empty", serde_json::json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = InProcessEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("a", handler("a-sub", &log, false)).await;
        bus.subscribe("b", handler("b-sub", &log, false)).await;

        bus.publish("a", serde_json::json!({"topic": "a"}))
            .await
            .unwrap();

        let entries = log.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "a-sub");
    }

    #[tokio::test]
    async fn per_topic_delivery_is_fifo_for_a_single_publisher() {
        let bus = InProcessEventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("t", handler("sub", &log, false)).await;

        for n in 0..5 {
            bus.publish("t", serde_json::json!({"n": n})).await.unwrap();
        }

        let entries = log.lock().unwrap();
        let seen: Vec<i64> = entries.iter().map(|(_, v)| v["n"].as_i64().unwrap()).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
