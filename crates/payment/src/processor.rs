//! The payment processor: consumes `OrderCreated`, settles the charge and
//! records the saga's terminating event.

use std::sync::Arc;

use async_trait::async_trait;
use bus::{BusMessage, EventHandler, HandlerError};
use chrono::Utc;
use common::{OrderId, PaymentId};
use saga::{SagaError, SagaStateStore, SagaStep, SagaTracker};
use store::{AttemptOutcome, PaymentRecord, PaymentStatus, PaymentStore, StoreError};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::error::{PaymentError, Result};
use crate::gateway::{ChargeReceipt, ChargeRequest, PaymentGateway};
use crate::retry::RetryPolicy;

use domain::{ORDER_CREATED, OrderCreatedEvent, PaymentCompletedEvent, PaymentFailedEvent};

/// Derives the provider idempotency key for an order.
///
/// UUIDv5 over the order id: every processing run of the same order,
/// including redeliveries on other instances, sends the same key.
pub fn idempotency_key(order_id: OrderId) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, order_id.as_uuid().as_bytes()).to_string()
}

enum ChargeOutcome {
    Settled(ChargeReceipt),
    GaveUp(String),
}

/// Per-order payment state machine.
///
/// Exactly-once *effect* on top of at-least-once delivery: the payment row
/// is unique per order, the idempotency key is deterministic, and a
/// redelivered `OrderCreated` for a settled payment exits without touching
/// the provider. The terminal `PaymentCompleted`/`PaymentFailed` event is
/// written to the outbox in the same atomic unit that settles the payment,
/// so it cannot be lost between settling and publication.
pub struct PaymentProcessor<S> {
    store: S,
    tracker: SagaTracker<S>,
    gateway: Arc<dyn PaymentGateway>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl<S> PaymentProcessor<S>
where
    S: PaymentStore + SagaStateStore + Clone,
{
    /// Creates a processor with the default retry policy.
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>, breaker: Arc<CircuitBreaker>) -> Self {
        Self::with_retry_policy(store, gateway, breaker, RetryPolicy::default())
    }

    /// Creates a processor with an explicit retry policy.
    pub fn with_retry_policy(
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        let tracker = SagaTracker::new(store.clone());
        Self {
            store,
            tracker,
            gateway,
            breaker,
            retry,
        }
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id))]
    async fn on_order_created(&self, event: OrderCreatedEvent) -> Result<()> {
        let Some(payment) = self.open_payment(&event).await? else {
            return Ok(());
        };

        self.tracker
            .advance_idempotent(event.order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await?;

        let request = ChargeRequest {
            order_id: payment.order_id,
            amount: payment.amount,
            payment_method: payment.payment_method,
            idempotency_key: payment.idempotency_key.clone(),
        };

        match self.attempt_charge(&payment, &request).await? {
            ChargeOutcome::Settled(receipt) => self.complete(payment, receipt).await,
            ChargeOutcome::GaveUp(reason) => self.fail(payment, reason).await,
        }
    }

    /// Finds or creates the `Pending` payment row for this order.
    ///
    /// Returns `None` when the payment is already settled, which is the
    /// duplicate-delivery exit.
    async fn open_payment(&self, event: &OrderCreatedEvent) -> Result<Option<PaymentRecord>> {
        if let Some(existing) = self.store.get_payment_by_order(event.order_id).await? {
            if existing.status.is_terminal() {
                tracing::info!(status = %existing.status, "payment already settled, duplicate delivery");
                return Ok(None);
            }
            tracing::info!(payment_id = %existing.id, "resuming pending payment");
            return Ok(Some(existing));
        }

        let now = Utc::now();
        let payment = PaymentRecord {
            id: PaymentId::new(),
            order_id: event.order_id,
            amount: event.total,
            status: PaymentStatus::Pending,
            payment_method: event.payment_method,
            idempotency_key: idempotency_key(event.order_id),
            transaction_ref: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_payment(payment.clone()).await {
            Ok(()) => Ok(Some(payment)),
            // Lost the insert race with a concurrent delivery
            Err(StoreError::DuplicatePayment(_)) => {
                match self.store.get_payment_by_order(event.order_id).await? {
                    Some(existing) if existing.status.is_terminal() => Ok(None),
                    Some(existing) => Ok(Some(existing)),
                    None => Err(PaymentError::Store(StoreError::DuplicatePayment(
                        event.order_id,
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs the retry loop around the breaker-guarded gateway call.
    ///
    /// Breaker rejections consume attempt budget (with backoff, so the
    /// loop cannot spin hot against an open breaker) but are not physical
    /// calls and record no attempt row. Every granted permit is settled:
    /// the provider's answer is reported to the breaker before any store
    /// write, and a permit that never reaches the provider is released,
    /// so a half-open trial can never be left dangling.
    async fn attempt_charge(
        &self,
        payment: &PaymentRecord,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome> {
        let mut last_failure = "circuit breaker open".to_string();

        for attempt in 1..=self.retry.max_attempts {
            if !self.breaker.try_acquire() {
                tracing::warn!(attempt, "circuit breaker open, failing fast");
                metrics::counter!("payment_breaker_rejections").increment(1);
                last_failure = "circuit breaker open".to_string();
            } else {
                let attempt_row = match self.store.begin_payment_attempt(payment.id).await {
                    Ok(row) => row,
                    Err(e) => {
                        self.breaker.release();
                        return Err(e.into());
                    }
                };
                metrics::counter!("payment_attempts").increment(1);

                let charged = self.gateway.charge(request).await;
                match &charged {
                    Ok(_) => self.breaker.record_success(),
                    Err(e) if e.is_transient() => self.breaker.record_failure(),
                    // An authoritative answer from a healthy provider:
                    // settles a half-open trial as a success and leaves
                    // the failure window alone.
                    Err(_) => self.breaker.record_success(),
                }

                match charged {
                    Ok(receipt) => {
                        self.store
                            .finish_payment_attempt(attempt_row.id, AttemptOutcome::Success, None)
                            .await?;
                        return Ok(ChargeOutcome::Settled(receipt));
                    }
                    Err(e) => {
                        let message = e.to_string();
                        self.store
                            .finish_payment_attempt(
                                attempt_row.id,
                                AttemptOutcome::Failed,
                                Some(&message),
                            )
                            .await?;
                        if !e.is_transient() {
                            tracing::info!(attempt, error = %message, "charge rejected");
                            return Ok(ChargeOutcome::GaveUp(message));
                        }
                        tracing::warn!(attempt, error = %message, "transient charge failure");
                        last_failure = message;
                    }
                }
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.backoff_delay(attempt)).await;
            }
        }

        Ok(ChargeOutcome::GaveUp(last_failure))
    }

    async fn complete(&self, payment: PaymentRecord, receipt: ChargeReceipt) -> Result<()> {
        let event = PaymentCompletedEvent {
            order_id: payment.order_id,
            payment_id: payment.id,
            amount: payment.amount,
            status: PaymentStatus::Completed,
            transaction_id: receipt.transaction_id.clone(),
        };
        let payment = self
            .store
            .mark_payment_completed(payment.id, &receipt.transaction_id, event.to_outbox_event()?)
            .await?;
        self.tracker
            .advance_idempotent(
                payment.order_id,
                SagaStep::PaymentPending,
                SagaStep::PaymentProcessed,
            )
            .await?;

        metrics::counter!("payments_completed").increment(1);
        tracing::info!(payment_id = %payment.id, amount = %payment.amount, "payment completed");
        Ok(())
    }

    async fn fail(&self, payment: PaymentRecord, reason: String) -> Result<()> {
        let event = PaymentFailedEvent {
            order_id: payment.order_id,
            payment_id: payment.id,
            status: PaymentStatus::Failed,
            failure_reason: reason.clone(),
        };
        let payment = self
            .store
            .mark_payment_failed(payment.id, &reason, event.to_outbox_event()?)
            .await?;
        self.tracker
            .advance_idempotent(payment.order_id, SagaStep::PaymentPending, SagaStep::Failed)
            .await?;

        metrics::counter!("payments_failed").increment(1);
        tracing::warn!(payment_id = %payment.id, %reason, "payment failed");
        Ok(())
    }
}

/// Maps processing failures onto the consumer's redelivery semantics.
fn classify(error: PaymentError) -> HandlerError {
    match error {
        PaymentError::Payload(e) => HandlerError::Permanent(e.to_string()),
        PaymentError::Saga(SagaError::IllegalTransition { .. }) => {
            HandlerError::Permanent(error.to_string())
        }
        other => HandlerError::Transient(other.to_string()),
    }
}

#[async_trait]
impl<S> EventHandler for PaymentProcessor<S>
where
    S: PaymentStore + SagaStateStore + Clone + Send + Sync,
{
    fn name(&self) -> &'static str {
        "payment-processor"
    }

    async fn handle(&self, message: &BusMessage) -> std::result::Result<(), HandlerError> {
        match message.event_type.as_str() {
            ORDER_CREATED => {
                let event: OrderCreatedEvent = serde_json::from_value(message.payload.clone())
                    .map_err(|e| HandlerError::Permanent(e.to_string()))?;
                self.on_order_created(event).await.map_err(classify)
            }
            other => {
                tracing::debug!(event_type = %other, "ignoring event");
                Ok(())
            }
        }
    }
}
