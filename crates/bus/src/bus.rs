//! The bus trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::BusMessage;

/// A handle on a topic's message stream.
///
/// Each subscription receives its own copy of every message published to
/// the topic, in publish order.
pub struct Subscription {
    pub(crate) receiver: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    /// Receives the next message, or `None` once the bus is gone and the
    /// backlog is drained.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

/// A topic-based message bus with at-least-once delivery.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a message and waits for the broker's acknowledgement.
    async fn publish(&self, message: BusMessage) -> Result<()>;

    /// Subscribes to a topic. Only messages published after the
    /// subscription exists are delivered.
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
}
