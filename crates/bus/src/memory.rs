//! In-memory bus for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::bus::{MessageBus, Subscription};
use crate::error::{BusError, Result};
use crate::message::BusMessage;

/// In-memory implementation of [`MessageBus`].
///
/// Per-topic fan-out over unbounded channels; a single channel per
/// subscriber preserves publish order, which is the same per-key ordering
/// guarantee a partitioned broker gives when all of an order's events share
/// one key.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>,
    published: Vec<BusMessage>,
    fail_next_publishes: usize,
}

impl InMemoryBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` publishes fail, simulating a broker outage.
    pub async fn set_fail_next_publishes(&self, count: usize) {
        self.inner.write().await.fail_next_publishes = count;
    }

    /// Returns every message successfully published so far.
    pub async fn published(&self) -> Vec<BusMessage> {
        self.inner.read().await.published.clone()
    }

    /// Returns the successfully published messages on one topic.
    pub async fn published_on(&self, topic: &str) -> Vec<BusMessage> {
        self.inner
            .read()
            .await
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: BusMessage) -> Result<()> {
        let mut inner = self.inner.write().await;

        if inner.fail_next_publishes > 0 {
            inner.fail_next_publishes -= 1;
            return Err(BusError::PublishFailed {
                topic: message.topic.clone(),
                reason: "simulated broker failure".to_string(),
            });
        }

        if let Some(senders) = inner.subscribers.get_mut(&message.topic) {
            // Dropped receivers are pruned on the way through
            senders.retain(|s| s.send(message.clone()).is_ok());
        }
        inner.published.push(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .write()
            .await
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription { receiver: rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, key: &str, event_type: &str) -> BusMessage {
        BusMessage::new(topic, key, event_type, serde_json::json!({"k": key}))
    }

    #[tokio::test]
    async fn test_delivers_in_publish_order() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("order-events").await.unwrap();

        bus.publish(message("order-events", "o1", "OrderCreated"))
            .await
            .unwrap();
        bus.publish(message("order-events", "o2", "OrderCreated"))
            .await
            .unwrap();

        assert_eq!(sub.recv().await.unwrap().key, "o1");
        assert_eq!(sub.recv().await.unwrap().key, "o2");
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = InMemoryBus::new();
        let mut orders = bus.subscribe("order-events").await.unwrap();

        bus.publish(message("payment-events", "o1", "PaymentCompleted"))
            .await
            .unwrap();
        bus.publish(message("order-events", "o1", "OrderCreated"))
            .await
            .unwrap();

        assert_eq!(orders.recv().await.unwrap().event_type, "OrderCreated");
        assert_eq!(bus.published_on("payment-events").await.len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_to_multiple_subscribers() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe("order-events").await.unwrap();
        let mut second = bus.subscribe("order-events").await.unwrap();

        bus.publish(message("order-events", "o1", "OrderCreated"))
            .await
            .unwrap();

        assert_eq!(first.recv().await.unwrap().key, "o1");
        assert_eq!(second.recv().await.unwrap().key, "o1");
    }

    #[tokio::test]
    async fn test_simulated_publish_failure() {
        let bus = InMemoryBus::new();
        bus.set_fail_next_publishes(1).await;

        let result = bus
            .publish(message("order-events", "o1", "OrderCreated"))
            .await;
        assert!(matches!(result, Err(BusError::PublishFailed { .. })));
        assert!(bus.published().await.is_empty());

        // Next publish goes through
        bus.publish(message("order-events", "o1", "OrderCreated"))
            .await
            .unwrap();
        assert_eq!(bus.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_messages() {
        let bus = InMemoryBus::new();
        bus.publish(message("order-events", "o1", "OrderCreated"))
            .await
            .unwrap();

        let mut sub = bus.subscribe("order-events").await.unwrap();
        bus.publish(message("order-events", "o2", "OrderCreated"))
            .await
            .unwrap();

        assert_eq!(sub.recv().await.unwrap().key, "o2");
    }
}
