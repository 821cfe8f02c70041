//! Consumer loop driving an [`EventHandler`] from a subscription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::bus::Subscription;
use crate::error::HandlerError;
use crate::message::BusMessage;

/// Processes messages delivered by a consumer loop.
///
/// Handlers must tolerate redelivery: the bus guarantees at-least-once, so
/// the same message can arrive more than once and must converge on the
/// same state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handles one message.
    async fn handle(&self, message: &BusMessage) -> std::result::Result<(), HandlerError>;
}

/// Redelivery policy for a consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How many times a transiently failing message is retried in place
    /// before it is dropped.
    pub max_redeliveries: u32,

    /// Pause between redeliveries of the same message.
    pub redelivery_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_redeliveries: 5,
            redelivery_delay: Duration::from_millis(500),
        }
    }
}

/// Drives one handler from one subscription until shutdown.
///
/// A message is committed (dropped from the stream) only after the handler
/// returns `Ok` or exhausts its redeliveries; a failing message never
/// kills the loop.
pub struct Consumer {
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
}

impl Consumer {
    /// Creates a consumer with the default redelivery policy.
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self::with_config(handler, ConsumerConfig::default())
    }

    /// Creates a consumer with an explicit redelivery policy.
    pub fn with_config(handler: Arc<dyn EventHandler>, config: ConsumerConfig) -> Self {
        Self { handler, config }
    }

    /// Runs until the shutdown signal fires or the bus is dropped.
    #[tracing::instrument(skip_all, fields(handler = self.handler.name()))]
    pub async fn run(self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("consumer started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe = subscription.recv() => {
                    match maybe {
                        Some(message) => self.dispatch(message).await,
                        None => break,
                    }
                }
            }
        }
        tracing::info!("consumer stopped");
    }

    async fn dispatch(&self, message: BusMessage) {
        let mut deliveries = 0;
        loop {
            deliveries += 1;
            match self.handler.handle(&message).await {
                Ok(()) => {
                    metrics::counter!("consumer_messages_processed", "handler" => self.handler.name())
                        .increment(1);
                    return;
                }
                Err(HandlerError::Permanent(reason)) => {
                    tracing::error!(
                        event_type = %message.event_type,
                        key = %message.key,
                        %reason,
                        "dropping message after permanent failure"
                    );
                    metrics::counter!("consumer_messages_dropped", "handler" => self.handler.name())
                        .increment(1);
                    return;
                }
                Err(HandlerError::Transient(reason)) if deliveries <= self.config.max_redeliveries => {
                    tracing::warn!(
                        event_type = %message.event_type,
                        key = %message.key,
                        deliveries,
                        %reason,
                        "transient failure, redelivering"
                    );
                    tokio::time::sleep(self.config.redelivery_delay).await;
                }
                Err(HandlerError::Transient(reason)) => {
                    tracing::error!(
                        event_type = %message.event_type,
                        key = %message.key,
                        deliveries,
                        %reason,
                        "dropping message after exhausting redeliveries"
                    );
                    metrics::counter!("consumer_messages_dropped", "handler" => self.handler.name())
                        .increment(1);
                    return;
                }
            }
        }
    }
}
