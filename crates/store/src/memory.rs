//! In-memory store implementation for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, PaymentId};
use saga::{SagaError, SagaState, SagaStateStore, SagaStep};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::records::{
    AttemptOutcome, NewOrder, NewOutboxEvent, OrderLineItemRecord, OrderRecord, OrderStatus,
    OutboxRecord, PaymentAttemptRecord, PaymentRecord,
};
use crate::repo::{OrderStore, OutboxStore, PaymentStore};

#[derive(Default)]
struct Inner {
    orders: HashMap<OrderId, OrderRecord>,
    line_items: HashMap<OrderId, Vec<OrderLineItemRecord>>,
    outbox: Vec<OutboxRecord>,
    next_outbox_id: i64,
    sagas: HashMap<OrderId, SagaState>,
    payments: HashMap<PaymentId, PaymentRecord>,
    payment_by_order: HashMap<OrderId, PaymentId>,
    attempts: Vec<PaymentAttemptRecord>,
    next_attempt_id: i64,
}

impl Inner {
    fn append_outbox(&mut self, event: NewOutboxEvent) {
        self.next_outbox_id += 1;
        self.outbox.push(OutboxRecord {
            id: self.next_outbox_id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            payload: event.payload,
            processed: false,
            claimed_at: None,
            created_at: Utc::now(),
            processed_at: None,
        });
    }
}

/// In-memory implementation of every storage trait.
///
/// Mirrors the semantics of the PostgreSQL implementation, including
/// conditional saga advances and outbox lease claims, so the component
/// crates can be tested without a database.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of outbox rows, processed or not.
    pub async fn outbox_len(&self) -> usize {
        self.inner.read().await.outbox.len()
    }

    /// Returns all outbox rows, for test assertions.
    pub async fn outbox_rows(&self) -> Vec<OutboxRecord> {
        self.inner.read().await.outbox.clone()
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(&self, new_order: NewOrder) -> Result<()> {
        let mut inner = self.inner.write().await;
        let order_id = new_order.order.id;

        if inner.orders.contains_key(&order_id) {
            return Err(StoreError::DuplicateOrder(order_id));
        }

        inner.orders.insert(order_id, new_order.order);
        inner.line_items.insert(order_id, new_order.line_items);
        inner.append_outbox(new_order.outbox_event);
        inner.sagas.insert(order_id, new_order.saga_state);
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        Ok(self.inner.read().await.orders.get(&order_id).cloned())
    }

    async fn get_line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItemRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .line_items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        failure_reason: Option<String>,
        outbox_event: NewOutboxEvent,
    ) -> Result<Option<OrderRecord>> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if order.status == status {
            return Ok(None);
        }

        order.status = status;
        order.failure_reason = failure_reason;
        order.updated_at = Utc::now();
        let updated = order.clone();

        inner.append_outbox(outbox_event);
        Ok(Some(updated))
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claim_outbox_batch(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxRecord>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(lease.as_secs() as i64);

        let mut claimable: Vec<usize> = inner
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.processed && e.claimed_at.is_none_or(|t| t < cutoff))
            .map(|(i, _)| i)
            .collect();
        claimable.sort_by_key(|&i| inner.outbox[i].created_at);
        claimable.truncate(limit);

        let mut claimed = Vec::with_capacity(claimable.len());
        for i in claimable {
            inner.outbox[i].claimed_at = Some(now);
            claimed.push(inner.outbox[i].clone());
        }
        Ok(claimed)
    }

    async fn mark_outbox_processed(&self, event_id: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let event = inner
            .outbox
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or(StoreError::OutboxEventNotFound(event_id))?;
        event.processed = true;
        event.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn release_outbox_claims(&self, event_ids: &[i64]) -> Result<()> {
        let mut inner = self.inner.write().await;
        for event in inner.outbox.iter_mut() {
            if !event.processed && event_ids.contains(&event.id) {
                event.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn unprocessed_outbox_count(&self) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .await
            .outbox
            .iter()
            .filter(|e| !e.processed)
            .count() as u64)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: PaymentRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.payment_by_order.contains_key(&payment.order_id) {
            return Err(StoreError::DuplicatePayment(payment.order_id));
        }
        inner.payment_by_order.insert(payment.order_id, payment.id);
        inner.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get_payment_by_order(&self, order_id: OrderId) -> Result<Option<PaymentRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .payment_by_order
            .get(&order_id)
            .and_then(|id| inner.payments.get(id))
            .cloned())
    }

    async fn mark_payment_completed(
        &self,
        payment_id: PaymentId,
        transaction_ref: &str,
        outbox_event: NewOutboxEvent,
    ) -> Result<PaymentRecord> {
        let mut inner = self.inner.write().await;
        let payment = inner
            .payments
            .get_mut(&payment_id)
            .ok_or(StoreError::PaymentNotFound(payment_id))?;
        payment.status = crate::records::PaymentStatus::Completed;
        payment.transaction_ref = Some(transaction_ref.to_string());
        payment.updated_at = Utc::now();
        let updated = payment.clone();
        inner.append_outbox(outbox_event);
        Ok(updated)
    }

    async fn mark_payment_failed(
        &self,
        payment_id: PaymentId,
        reason: &str,
        outbox_event: NewOutboxEvent,
    ) -> Result<PaymentRecord> {
        let mut inner = self.inner.write().await;
        let payment = inner
            .payments
            .get_mut(&payment_id)
            .ok_or(StoreError::PaymentNotFound(payment_id))?;
        payment.status = crate::records::PaymentStatus::Failed;
        payment.failure_reason = Some(reason.to_string());
        payment.updated_at = Utc::now();
        let updated = payment.clone();
        inner.append_outbox(outbox_event);
        Ok(updated)
    }

    async fn begin_payment_attempt(&self, payment_id: PaymentId) -> Result<PaymentAttemptRecord> {
        let mut inner = self.inner.write().await;
        if !inner.payments.contains_key(&payment_id) {
            return Err(StoreError::PaymentNotFound(payment_id));
        }

        let attempt_number = inner
            .attempts
            .iter()
            .filter(|a| a.payment_id == payment_id)
            .map(|a| a.attempt_number)
            .max()
            .unwrap_or(0)
            + 1;

        inner.next_attempt_id += 1;
        let attempt = PaymentAttemptRecord {
            id: inner.next_attempt_id,
            payment_id,
            attempt_number,
            outcome: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        inner.attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn finish_payment_attempt(
        &self,
        attempt_id: i64,
        outcome: AttemptOutcome,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let attempt = inner
            .attempts
            .iter_mut()
            .find(|a| a.id == attempt_id)
            .ok_or(StoreError::AttemptNotFound(attempt_id))?;
        attempt.outcome = Some(outcome);
        attempt.error_message = error_message.map(str::to_string);
        attempt.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn list_payment_attempts(
        &self,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentAttemptRecord>> {
        let inner = self.inner.read().await;
        let mut attempts: Vec<_> = inner
            .attempts
            .iter()
            .filter(|a| a.payment_id == payment_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }
}

#[async_trait]
impl SagaStateStore for InMemoryStore {
    async fn get_saga_state(
        &self,
        order_id: OrderId,
    ) -> std::result::Result<Option<SagaState>, SagaError> {
        Ok(self.inner.read().await.sagas.get(&order_id).cloned())
    }

    async fn insert_saga_state(&self, state: SagaState) -> std::result::Result<(), SagaError> {
        let mut inner = self.inner.write().await;
        if inner.sagas.contains_key(&state.order_id) {
            return Err(SagaError::AlreadyExists(state.order_id));
        }
        inner.sagas.insert(state.order_id, state);
        Ok(())
    }

    async fn advance_saga_state(
        &self,
        order_id: OrderId,
        expected: SagaStep,
        next: SagaStep,
    ) -> std::result::Result<SagaState, SagaError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .sagas
            .get_mut(&order_id)
            .ok_or(SagaError::NotFound(order_id))?;

        if state.current_step != expected {
            return Err(SagaError::ConcurrentModification {
                order_id,
                expected,
                actual: state.current_step,
            });
        }

        *state = state.advanced_to(next);
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use common::{Money, PaymentMethod, UserId};
    use saga::SagaTracker;

    use super::*;
    use crate::records::PaymentStatus;

    fn sample_new_order(order_id: OrderId) -> NewOrder {
        let order = OrderRecord {
            id: order_id,
            user_id: UserId::new(),
            status: OrderStatus::Pending,
            total: Money::from_minor_units(3000),
            delivery_address: "1 Test Lane".to_string(),
            payment_method: PaymentMethod::Card,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let line_items = vec![OrderLineItemRecord::new(
            order_id,
            "margherita",
            "Margherita",
            Money::from_minor_units(1500),
            2,
        )];
        NewOrder {
            order,
            line_items,
            outbox_event: NewOutboxEvent {
                aggregate_id: order_id,
                event_type: "OrderCreated".to_string(),
                payload: serde_json::json!({"orderId": order_id}),
            },
            saga_state: SagaState::initial(order_id),
        }
    }

    fn sample_payment(order_id: OrderId) -> PaymentRecord {
        PaymentRecord {
            id: PaymentId::new(),
            order_id,
            amount: Money::from_minor_units(3000),
            status: PaymentStatus::Pending,
            payment_method: PaymentMethod::Card,
            idempotency_key: "key".to_string(),
            transaction_ref: None,
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_order_writes_all_records() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        store.create_order(sample_new_order(order_id)).await.unwrap();

        assert!(store.get_order(order_id).await.unwrap().is_some());
        assert_eq!(store.get_line_items(order_id).await.unwrap().len(), 1);
        assert_eq!(store.unprocessed_outbox_count().await.unwrap(), 1);

        let saga = store.get_saga_state(order_id).await.unwrap().unwrap();
        assert_eq!(saga.current_step, SagaStep::Created);
    }

    #[tokio::test]
    async fn test_create_order_rejects_duplicate() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        store.create_order(sample_new_order(order_id)).await.unwrap();

        let err = store
            .create_order(sample_new_order(order_id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrder(_)));
    }

    #[tokio::test]
    async fn test_update_order_status_dedupes_on_current_status() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        store.create_order(sample_new_order(order_id)).await.unwrap();

        let event = NewOutboxEvent {
            aggregate_id: order_id,
            event_type: "OrderStatusChanged".to_string(),
            payload: serde_json::json!({"newStatus": "PAID"}),
        };

        let updated = store
            .update_order_status(order_id, OrderStatus::Paid, None, event.clone())
            .await
            .unwrap();
        assert_eq!(updated.unwrap().status, OrderStatus::Paid);
        assert_eq!(store.unprocessed_outbox_count().await.unwrap(), 2);

        // Second application is a no-op: no write, no extra outbox event.
        let updated = store
            .update_order_status(order_id, OrderStatus::Paid, None, event)
            .await
            .unwrap();
        assert!(updated.is_none());
        assert_eq!(store.unprocessed_outbox_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_outbox_claim_respects_lease_and_processed() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        store.create_order(sample_new_order(order_id)).await.unwrap();

        let batch = store
            .claim_outbox_batch(10, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);

        // Claimed rows are leased out; a concurrent claim sees nothing.
        let batch2 = store
            .claim_outbox_batch(10, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(batch2.is_empty());

        // A zero lease expires immediately and the row comes back.
        let batch3 = store
            .claim_outbox_batch(10, Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(batch3.len(), 1);

        store.mark_outbox_processed(batch[0].id).await.unwrap();
        let batch4 = store
            .claim_outbox_batch(10, Duration::from_secs(0))
            .await
            .unwrap();
        assert!(batch4.is_empty());
        assert_eq!(store.unprocessed_outbox_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_released_claims_are_reclaimable_within_lease() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        store.create_order(sample_new_order(order_id)).await.unwrap();

        let lease = Duration::from_secs(60);
        let batch = store.claim_outbox_batch(10, lease).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(store.claim_outbox_batch(10, lease).await.unwrap().is_empty());

        // Releasing hands the row back without waiting out the lease
        store.release_outbox_claims(&[batch[0].id]).await.unwrap();
        let reclaimed = store.claim_outbox_batch(10, lease).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, batch[0].id);
    }

    #[tokio::test]
    async fn test_settling_payment_appends_outbox_event() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        let payment = sample_payment(order_id);
        store.insert_payment(payment.clone()).await.unwrap();

        let settled = store
            .mark_payment_completed(
                payment.id,
                "txn-1",
                NewOutboxEvent {
                    aggregate_id: order_id,
                    event_type: "PaymentCompleted".to_string(),
                    payload: serde_json::json!({"transactionId": "txn-1"}),
                },
            )
            .await
            .unwrap();

        assert_eq!(settled.status, PaymentStatus::Completed);
        let rows = store.outbox_rows().await;
        assert!(rows.iter().any(|e| e.event_type == "PaymentCompleted"));
    }

    #[tokio::test]
    async fn test_payment_unique_per_order() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();

        store.insert_payment(sample_payment(order_id)).await.unwrap();
        let err = store
            .insert_payment(sample_payment(order_id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePayment(_)));
    }

    #[tokio::test]
    async fn test_attempt_numbers_strictly_increase() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        let payment = sample_payment(order_id);
        let payment_id = payment.id;
        store.insert_payment(payment).await.unwrap();

        let a1 = store.begin_payment_attempt(payment_id).await.unwrap();
        store
            .finish_payment_attempt(a1.id, AttemptOutcome::Failed, Some("timeout"))
            .await
            .unwrap();
        let a2 = store.begin_payment_attempt(payment_id).await.unwrap();
        store
            .finish_payment_attempt(a2.id, AttemptOutcome::Success, None)
            .await
            .unwrap();

        let attempts = store.list_payment_attempts(payment_id).await.unwrap();
        assert_eq!(
            attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(attempts[0].outcome, Some(AttemptOutcome::Failed));
        assert_eq!(attempts[1].outcome, Some(AttemptOutcome::Success));
    }

    #[tokio::test]
    async fn test_saga_tracker_over_memory_store() {
        let store = InMemoryStore::new();
        let order_id = OrderId::new();
        store.create_order(sample_new_order(order_id)).await.unwrap();

        let tracker = SagaTracker::new(store.clone());
        tracker
            .advance(order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap();

        let err = tracker
            .advance(order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::ConcurrentModification { .. }));
    }
}
