//! The polling task bridging the outbox table to the bus.

use std::time::Duration;

use bus::{BusMessage, MessageBus};
use domain::topic_for;
use store::{OutboxRecord, OutboxStore};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Tuning knobs for the publisher loop.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// How often the outbox is polled.
    pub poll_interval: Duration,

    /// Maximum events claimed per cycle.
    pub batch_size: usize,

    /// How long a claim holds before another instance may reclaim the row.
    /// Must comfortably exceed the time to publish one batch.
    pub claim_lease: Duration,

    /// How long to wait for a single broker acknowledgement.
    pub publish_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            claim_lease: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// Polls the outbox and relays unpublished events to the bus.
///
/// Rows are marked processed only after a positive broker ack, so a crash
/// anywhere in the cycle re-publishes rather than loses. Downstream
/// consumers therefore see at-least-once delivery.
pub struct OutboxPublisher<S, B> {
    store: S,
    bus: B,
    config: PublisherConfig,
}

impl<S, B> OutboxPublisher<S, B>
where
    S: OutboxStore,
    B: MessageBus,
{
    /// Creates a publisher with default tuning.
    pub fn new(store: S, bus: B) -> Self {
        Self::with_config(store, bus, PublisherConfig::default())
    }

    /// Creates a publisher with explicit tuning.
    pub fn with_config(store: S, bus: B, config: PublisherConfig) -> Self {
        Self { store, bus, config }
    }

    /// Runs until the shutdown signal fires. The in-flight batch always
    /// finishes before the loop exits.
    #[tracing::instrument(skip_all)]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox publisher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            // Outside the select, so shutdown cannot cancel a batch midway
            if let Err(e) = self.publish_batch().await {
                tracing::error!(error = %e, "outbox cycle failed");
            }
        }
        tracing::info!("outbox publisher stopped");
    }

    /// Claims one batch and publishes it, oldest first.
    ///
    /// Stops at the first publish failure: later events may share a key
    /// with the failed one, and skipping ahead would break per-key order.
    /// The failed and unattempted rows get their claims released, so the
    /// next poll retries them instead of waiting out the lease.
    /// Returns how many events were published and marked.
    pub async fn publish_batch(&self) -> store::Result<usize> {
        let batch = self
            .store
            .claim_outbox_batch(self.config.batch_size, self.config.claim_lease)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut published = 0;
        let mut remaining = batch.into_iter();
        while let Some(event) = remaining.next() {
            if !self.publish_one(&event).await {
                let mut stalled = vec![event.id];
                stalled.extend(remaining.map(|e| e.id));
                self.store.release_outbox_claims(&stalled).await?;
                break;
            }
            self.store.mark_outbox_processed(event.id).await?;
            metrics::counter!("outbox_events_published").increment(1);
            published += 1;
        }

        tracing::debug!(published, "outbox cycle complete");
        Ok(published)
    }

    async fn publish_one(&self, event: &OutboxRecord) -> bool {
        let message = BusMessage::new(
            topic_for(&event.event_type),
            event.aggregate_id.to_string(),
            event.event_type.clone(),
            event.payload.clone(),
        );

        let result = tokio::time::timeout(self.config.publish_timeout, self.bus.publish(message))
            .await;
        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(
                    event_id = event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "publish failed, leaving event unprocessed"
                );
                metrics::counter!("outbox_publish_failures").increment(1);
                false
            }
            Err(_) => {
                tracing::warn!(
                    event_id = event.id,
                    event_type = %event.event_type,
                    "publish timed out, leaving event unprocessed"
                );
                metrics::counter!("outbox_publish_failures").increment(1);
                false
            }
        }
    }
}
