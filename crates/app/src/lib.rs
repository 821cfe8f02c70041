//! Wiring for the saga runtime.
//!
//! [`start`] spawns the three long-lived participants (outbox publisher,
//! payment processor, order status updater) over any store/bus pair, so
//! the binary and the integration tests share one code path.

pub mod config;

use std::sync::Arc;

use bus::{Consumer, MessageBus};
use domain::{ORDER_EVENTS_TOPIC, OrderStatusUpdater, PAYMENT_EVENTS_TOPIC};
use outbox::OutboxPublisher;
use payment::{CircuitBreaker, PaymentGateway, PaymentProcessor};
use saga::SagaStateStore;
use store::{OrderStore, OutboxStore, PaymentStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use config::Config;

/// Handles on the running participants.
pub struct Runtime {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Signals shutdown and waits for every participant to finish its
    /// in-flight work.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Spawns the saga participants and returns their handles.
pub async fn start<S, B>(
    store: S,
    bus: B,
    gateway: Arc<dyn PaymentGateway>,
    config: &Config,
) -> bus::Result<Runtime>
where
    S: OrderStore + OutboxStore + PaymentStore + SagaStateStore + Clone + Send + Sync + 'static,
    B: MessageBus + Clone + Send + Sync + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let publisher =
        OutboxPublisher::with_config(store.clone(), bus.clone(), config.publisher_config());
    tasks.push(tokio::spawn(publisher.run(shutdown_rx.clone())));

    let breaker = Arc::new(CircuitBreaker::new(config.breaker_config()));
    let processor =
        PaymentProcessor::with_retry_policy(store.clone(), gateway, breaker, config.retry_policy());
    let subscription = bus.subscribe(ORDER_EVENTS_TOPIC).await?;
    tasks.push(tokio::spawn(
        Consumer::with_config(Arc::new(processor), config.consumer_config())
            .run(subscription, shutdown_rx.clone()),
    ));

    let updater = OrderStatusUpdater::new(store.clone());
    let subscription = bus.subscribe(PAYMENT_EVENTS_TOPIC).await?;
    tasks.push(tokio::spawn(
        Consumer::with_config(Arc::new(updater), config.consumer_config())
            .run(subscription, shutdown_rx.clone()),
    ));

    tracing::info!("saga participants started");
    Ok(Runtime {
        shutdown: shutdown_tx,
        tasks,
    })
}
