//! The order status updater: closes the saga loop.

use async_trait::async_trait;
use bus::{BusMessage, EventHandler, HandlerError};
use chrono::Utc;
use common::OrderId;
use saga::{SagaError, SagaStateStore, SagaStep, SagaTracker};
use store::{OrderStatus, OrderStore};

use crate::error::DomainError;
use crate::events::{
    OrderStatusChangedEvent, PAYMENT_COMPLETED, PAYMENT_FAILED, PaymentCompletedEvent,
    PaymentFailedEvent,
};

/// Consumes payment outcome events and moves the order (and saga) to its
/// terminal state.
///
/// Idempotent on order id and target status: a redelivered outcome event
/// changes nothing. An event can arrive before the rows it refers to are
/// readable, so missing state is reported as transient and redelivered
/// instead of assumed to be an error.
pub struct OrderStatusUpdater<S> {
    store: S,
    tracker: SagaTracker<S>,
}

impl<S> OrderStatusUpdater<S>
where
    S: OrderStore + SagaStateStore + Clone,
{
    /// Creates an updater over the given store.
    pub fn new(store: S) -> Self {
        let tracker = SagaTracker::new(store.clone());
        Self { store, tracker }
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    async fn on_payment_completed(
        &self,
        event: PaymentCompletedEvent,
    ) -> Result<(), DomainError> {
        let updated = self
            .store
            .update_order_status(
                event.order_id,
                OrderStatus::Paid,
                None,
                self.status_changed(event.order_id, OrderStatus::Paid, None)?,
            )
            .await?;

        if updated.is_none() {
            tracing::info!("order already paid, duplicate delivery");
        } else {
            metrics::counter!("orders_paid").increment(1);
            tracing::info!(transaction_id = %event.transaction_id, "order paid");
        }

        // Separate from the status write, so it must be safe to redo
        self.tracker
            .advance_idempotent(
                event.order_id,
                SagaStep::PaymentProcessed,
                SagaStep::Completed,
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    async fn on_payment_failed(&self, event: PaymentFailedEvent) -> Result<(), DomainError> {
        let reason = event.failure_reason.clone();
        let updated = self
            .store
            .update_order_status(
                event.order_id,
                OrderStatus::Failed,
                Some(reason.clone()),
                self.status_changed(event.order_id, OrderStatus::Failed, Some(reason.clone()))?,
            )
            .await?;

        if updated.is_none() {
            tracing::info!("order already failed, duplicate delivery");
        } else {
            metrics::counter!("orders_failed").increment(1);
            tracing::warn!(%reason, "order failed");
        }

        self.tracker
            .advance_idempotent(event.order_id, SagaStep::PaymentPending, SagaStep::Failed)
            .await?;
        Ok(())
    }

    fn status_changed(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        reason: Option<String>,
    ) -> Result<store::NewOutboxEvent, DomainError> {
        Ok(OrderStatusChangedEvent {
            order_id,
            new_status,
            reason,
            timestamp: Utc::now(),
        }
        .to_outbox_event()?)
    }
}

/// Maps domain failures onto the consumer's redelivery semantics.
fn classify(error: DomainError) -> HandlerError {
    match error {
        // Rows the event refers to may simply not be visible yet, and
        // database trouble clears up; both are worth a redelivery.
        DomainError::Store(_) => HandlerError::Transient(error.to_string()),
        DomainError::Saga(SagaError::IllegalTransition { .. }) => {
            HandlerError::Permanent(error.to_string())
        }
        DomainError::Saga(_) => HandlerError::Transient(error.to_string()),
        other => HandlerError::Permanent(other.to_string()),
    }
}

#[async_trait]
impl<S> EventHandler for OrderStatusUpdater<S>
where
    S: OrderStore + SagaStateStore + Clone + Send + Sync,
{
    fn name(&self) -> &'static str {
        "order-status-updater"
    }

    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        match message.event_type.as_str() {
            PAYMENT_COMPLETED => {
                let event: PaymentCompletedEvent = serde_json::from_value(message.payload.clone())
                    .map_err(|e| HandlerError::Permanent(e.to_string()))?;
                self.on_payment_completed(event).await.map_err(classify)
            }
            PAYMENT_FAILED => {
                let event: PaymentFailedEvent = serde_json::from_value(message.payload.clone())
                    .map_err(|e| HandlerError::Permanent(e.to_string()))?;
                self.on_payment_failed(event).await.map_err(classify)
            }
            other => {
                tracing::debug!(event_type = %other, "ignoring event");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{Money, PaymentId, PaymentMethod, UserId};
    use store::{InMemoryStore, PaymentStatus};

    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::events::ORDER_STATUS_CHANGED;
    use crate::handler::{OrderCommandHandler, OrderRequest, OrderRequestItem};

    async fn order_at_step(store: &InMemoryStore, step: SagaStep) -> OrderId {
        let handler =
            OrderCommandHandler::new(store.clone(), Arc::new(InMemoryCatalog::seeded()));
        let order = handler
            .create_order(OrderRequest {
                user_id: UserId::new(),
                items: vec![OrderRequestItem {
                    item_id: "margherita".to_string(),
                    quantity: 1,
                }],
                delivery_address: "42 Test Lane".to_string(),
                payment_method: PaymentMethod::Card,
            })
            .await
            .unwrap();

        let path = [
            SagaStep::PaymentPending,
            SagaStep::PaymentProcessed,
            SagaStep::Completed,
        ];
        let mut current = SagaStep::Created;
        for next in path {
            if current == step {
                break;
            }
            store
                .advance_saga_state(order.id, current, next)
                .await
                .unwrap();
            current = next;
        }
        order.id
    }

    fn completed_event(order_id: OrderId) -> PaymentCompletedEvent {
        PaymentCompletedEvent {
            order_id,
            payment_id: PaymentId::new(),
            amount: Money::from_minor_units(16500),
            status: PaymentStatus::Completed,
            transaction_id: "txn-1".to_string(),
        }
    }

    fn failed_event(order_id: OrderId) -> PaymentFailedEvent {
        PaymentFailedEvent {
            order_id,
            payment_id: PaymentId::new(),
            status: PaymentStatus::Failed,
            failure_reason: "insufficient funds".to_string(),
        }
    }

    #[tokio::test]
    async fn test_payment_completed_marks_order_paid() {
        let store = InMemoryStore::new();
        let order_id = order_at_step(&store, SagaStep::PaymentProcessed).await;

        let updater = OrderStatusUpdater::new(store.clone());
        updater
            .handle(&completed_event(order_id).to_bus_message().unwrap())
            .await
            .unwrap();

        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        let saga = store.get_saga_state(order_id).await.unwrap().unwrap();
        assert_eq!(saga.current_step, SagaStep::Completed);
        assert!(!saga.compensation_needed);

        // OrderCreated + OrderStatusChanged
        let outbox = store.outbox_rows().await;
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[1].event_type, ORDER_STATUS_CHANGED);
        assert_eq!(outbox[1].payload["newStatus"], "PAID");
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let store = InMemoryStore::new();
        let order_id = order_at_step(&store, SagaStep::PaymentProcessed).await;

        let updater = OrderStatusUpdater::new(store.clone());
        let message = completed_event(order_id).to_bus_message().unwrap();
        updater.handle(&message).await.unwrap();
        updater.handle(&message).await.unwrap();

        // No second OrderStatusChanged row
        assert_eq!(store.outbox_len().await, 2);
        let saga = store.get_saga_state(order_id).await.unwrap().unwrap();
        assert_eq!(saga.current_step, SagaStep::Completed);
    }

    #[tokio::test]
    async fn test_payment_failed_marks_order_failed() {
        let store = InMemoryStore::new();
        let order_id = order_at_step(&store, SagaStep::PaymentPending).await;

        let updater = OrderStatusUpdater::new(store.clone());
        updater
            .handle(&failed_event(order_id).to_bus_message().unwrap())
            .await
            .unwrap();

        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Failed);
        assert_eq!(order.failure_reason.as_deref(), Some("insufficient funds"));

        let saga = store.get_saga_state(order_id).await.unwrap().unwrap();
        assert_eq!(saga.current_step, SagaStep::Failed);
        assert!(saga.compensation_needed);
    }

    #[tokio::test]
    async fn test_event_ahead_of_saga_redelivers_then_completes() {
        let store = InMemoryStore::new();
        let order_id = order_at_step(&store, SagaStep::PaymentPending).await;

        // The outcome event can be relayed before the payment processor
        // advances the saga; the first delivery must come back around.
        let updater = OrderStatusUpdater::new(store.clone());
        let message = completed_event(order_id).to_bus_message().unwrap();
        let err = updater.handle(&message).await.unwrap_err();
        assert!(matches!(err, HandlerError::Transient(_)));

        let order = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        store
            .advance_saga_state(order_id, SagaStep::PaymentPending, SagaStep::PaymentProcessed)
            .await
            .unwrap();
        updater.handle(&message).await.unwrap();

        let saga = store.get_saga_state(order_id).await.unwrap().unwrap();
        assert_eq!(saga.current_step, SagaStep::Completed);
        // The redelivery added no second OrderStatusChanged row
        assert_eq!(store.outbox_len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_order_is_transient() {
        let updater = OrderStatusUpdater::new(InMemoryStore::new());
        let err = updater
            .handle(&completed_event(OrderId::new()).to_bus_message().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Transient(_)));
    }

    #[tokio::test]
    async fn test_garbled_payload_is_permanent() {
        let updater = OrderStatusUpdater::new(InMemoryStore::new());
        let message = BusMessage::new(
            "payment-events",
            "o1",
            PAYMENT_COMPLETED,
            serde_json::json!({"orderId": 12}),
        );
        let err = updater.handle(&message).await.unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_unrelated_event_ignored() {
        let updater = OrderStatusUpdater::new(InMemoryStore::new());
        let message = BusMessage::new(
            "order-events",
            "o1",
            "OrderCreated",
            serde_json::json!({}),
        );
        updater.handle(&message).await.unwrap();
    }
}
