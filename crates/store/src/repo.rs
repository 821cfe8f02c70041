//! Storage traits for the saga participants.
//!
//! All implementations must be thread-safe; multiple component instances
//! on separate machines coordinate exclusively through these operations
//! (conditional updates and lease claims), never through in-process locks.

use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, PaymentId};

use crate::error::Result;
use crate::records::{
    AttemptOutcome, NewOrder, NewOutboxEvent, OrderLineItemRecord, OrderRecord, OrderStatus,
    OutboxRecord, PaymentAttemptRecord, PaymentRecord,
};

/// Order persistence, including the transactional outbox writes that ride
/// along with order state changes.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists an order, its line items, its `OrderCreated` outbox event
    /// and its initial saga state in one atomic unit.
    ///
    /// Nothing is visible if any part fails.
    async fn create_order(&self, new_order: NewOrder) -> Result<()>;

    /// Returns the order, if it exists.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>>;

    /// Returns the order's line items.
    async fn get_line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItemRecord>>;

    /// Moves the order to `status` and appends `outbox_event`, atomically.
    ///
    /// Deduped against the current status: returns `None` without writing
    /// anything when the order is already in `status` (redelivered outcome
    /// events become no-ops). Fails with `OrderNotFound` if the order does
    /// not exist.
    async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        failure_reason: Option<String>,
        outbox_event: NewOutboxEvent,
    ) -> Result<Option<OrderRecord>>;
}

/// The write-ahead table bridging local transactions to the bus.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` unprocessed events, oldest first.
    ///
    /// Claimed rows carry a lease of `lease` duration; rows whose lease has
    /// expired are claimable again. Concurrent publisher instances never
    /// receive the same row within a lease.
    async fn claim_outbox_batch(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxRecord>>;

    /// Marks an event processed. Called only after a positive bus ack;
    /// processed events are never claimed again.
    async fn mark_outbox_processed(&self, event_id: i64) -> Result<()>;

    /// Clears the lease on claimed-but-unpublished events.
    ///
    /// Called when a publish fails so the next poll cycle retries the
    /// rows immediately instead of waiting out the remaining lease.
    /// Processed events are left alone.
    async fn release_outbox_claims(&self, event_ids: &[i64]) -> Result<()>;

    /// Returns the number of events still awaiting publication.
    async fn unprocessed_outbox_count(&self) -> Result<u64>;
}

/// Payment and payment-attempt persistence.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a new payment. Fails with `DuplicatePayment` when the order
    /// already has one (unique on order id).
    async fn insert_payment(&self, payment: PaymentRecord) -> Result<()>;

    /// Returns the payment for an order, if any.
    async fn get_payment_by_order(&self, order_id: OrderId) -> Result<Option<PaymentRecord>>;

    /// Marks the payment completed with the provider's transaction
    /// reference and appends `outbox_event`, atomically.
    ///
    /// Settling and the outcome event land together or not at all, so a
    /// crash cannot leave a completed payment whose event never reaches
    /// the bus.
    async fn mark_payment_completed(
        &self,
        payment_id: PaymentId,
        transaction_ref: &str,
        outbox_event: NewOutboxEvent,
    ) -> Result<PaymentRecord>;

    /// Marks the payment failed with a reason and appends `outbox_event`,
    /// atomically.
    async fn mark_payment_failed(
        &self,
        payment_id: PaymentId,
        reason: &str,
        outbox_event: NewOutboxEvent,
    ) -> Result<PaymentRecord>;

    /// Opens a new attempt row with the next strictly-increasing attempt
    /// number for this payment.
    async fn begin_payment_attempt(&self, payment_id: PaymentId) -> Result<PaymentAttemptRecord>;

    /// Records the outcome of a previously opened attempt.
    async fn finish_payment_attempt(
        &self,
        attempt_id: i64,
        outcome: AttemptOutcome,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Returns all attempts for a payment in attempt-number order.
    async fn list_payment_attempts(
        &self,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentAttemptRecord>>;
}
