//! Conditional-advance API used by every saga participant.

use async_trait::async_trait;
use common::OrderId;

use crate::error::{Result, SagaError};
use crate::state::SagaState;
use crate::step::SagaStep;

/// Persistence contract for saga state.
///
/// Implementations live in the storage layer; `advance` must be atomic and
/// conditional on the stored step still matching `expected`, since
/// participants on different machines coordinate only through this record.
#[async_trait]
pub trait SagaStateStore: Send + Sync {
    /// Returns the saga record for an order, if one exists.
    async fn get_saga_state(&self, order_id: OrderId) -> Result<Option<SagaState>>;

    /// Inserts the initial record. Fails with `AlreadyExists` on duplicates.
    async fn insert_saga_state(&self, state: SagaState) -> Result<()>;

    /// Conditionally advances the record.
    ///
    /// Applies only if the stored step still equals `expected`; otherwise
    /// fails with `ConcurrentModification` carrying the actual step. The
    /// update appends `next` to the completed steps, bumps the version and
    /// sets the compensation flag when `next` is the failure branch.
    async fn advance_saga_state(
        &self,
        order_id: OrderId,
        expected: SagaStep,
        next: SagaStep,
    ) -> Result<SagaState>;
}

/// Outcome of an idempotent advance attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The transition was applied; the new record is returned.
    Advanced(SagaState),

    /// Another participant already moved the saga at or past the target
    /// step; nothing was written.
    AlreadyDone(SagaStep),
}

/// The tracker every participant goes through to read or advance progress.
///
/// Transition legality is checked here, before touching the store, so the
/// step graph is enforced in exactly one place.
#[derive(Clone)]
pub struct SagaTracker<S> {
    store: S,
}

impl<S: SagaStateStore> SagaTracker<S> {
    /// Creates a tracker over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the current saga record for an order.
    pub async fn current(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        self.store.get_saga_state(order_id).await
    }

    /// Attempts the `expected -> next` transition.
    ///
    /// Illegal edges are rejected locally; a stale `expected` propagates
    /// as `ConcurrentModification` for the caller to resolve.
    pub async fn advance(
        &self,
        order_id: OrderId,
        expected: SagaStep,
        next: SagaStep,
    ) -> Result<SagaState> {
        if !expected.can_transition_to(next) {
            return Err(SagaError::IllegalTransition {
                from: expected,
                to: next,
            });
        }
        let state = self.store.advance_saga_state(order_id, expected, next).await?;
        tracing::debug!(%order_id, step = %next, "saga advanced");
        Ok(state)
    }

    /// Attempts the transition, absorbing the duplicate-delivery case.
    ///
    /// If a concurrent writer already moved the saga to (or past) `next`,
    /// this is reported as [`AdvanceOutcome::AlreadyDone`] instead of an
    /// error. Any other stale step still fails, because it means the caller
    /// is genuinely out of sync and must re-read.
    pub async fn advance_idempotent(
        &self,
        order_id: OrderId,
        expected: SagaStep,
        next: SagaStep,
    ) -> Result<AdvanceOutcome> {
        match self.advance(order_id, expected, next).await {
            Ok(state) => Ok(AdvanceOutcome::Advanced(state)),
            Err(SagaError::ConcurrentModification { actual, .. }) if actual.has_reached(next) => {
                tracing::debug!(%order_id, target = %next, %actual, "saga step already satisfied");
                Ok(AdvanceOutcome::AlreadyDone(actual))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Minimal in-memory store mirroring the conditional-update contract.
    #[derive(Clone, Default)]
    struct FakeStore {
        states: Arc<Mutex<HashMap<OrderId, SagaState>>>,
    }

    #[async_trait]
    impl SagaStateStore for FakeStore {
        async fn get_saga_state(&self, order_id: OrderId) -> Result<Option<SagaState>> {
            Ok(self.states.lock().unwrap().get(&order_id).cloned())
        }

        async fn insert_saga_state(&self, state: SagaState) -> Result<()> {
            let mut states = self.states.lock().unwrap();
            if states.contains_key(&state.order_id) {
                return Err(SagaError::AlreadyExists(state.order_id));
            }
            states.insert(state.order_id, state);
            Ok(())
        }

        async fn advance_saga_state(
            &self,
            order_id: OrderId,
            expected: SagaStep,
            next: SagaStep,
        ) -> Result<SagaState> {
            let mut states = self.states.lock().unwrap();
            let state = states
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

    async fn tracker_with_order() -> (SagaTracker<FakeStore>, OrderId) {
        let store = FakeStore::default();
        let order_id = OrderId::new();
        store
            .insert_saga_state(SagaState::initial(order_id))
            .await
            .unwrap();
        (SagaTracker::new(store), order_id)
    }

    #[tokio::test]
    async fn test_advance_happy_path() {
        let (tracker, order_id) = tracker_with_order().await;

        let state = tracker
            .advance(order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap();
        assert_eq!(state.current_step, SagaStep::PaymentPending);
        assert_eq!(state.version, 2);

        let state = tracker
            .advance(order_id, SagaStep::PaymentPending, SagaStep::PaymentProcessed)
            .await
            .unwrap();
        let state = tracker
            .advance(order_id, SagaStep::PaymentProcessed, SagaStep::Completed)
            .await
            .unwrap();
        assert!(state.is_terminal());
        assert_eq!(
            state.steps_completed,
            vec![
                SagaStep::Created,
                SagaStep::PaymentPending,
                SagaStep::PaymentProcessed,
                SagaStep::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected_before_store() {
        let (tracker, order_id) = tracker_with_order().await;

        let err = tracker
            .advance(order_id, SagaStep::Created, SagaStep::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::IllegalTransition { .. }));

        // Nothing was written.
        let state = tracker.current(order_id).await.unwrap().unwrap();
        assert_eq!(state.current_step, SagaStep::Created);
    }

    #[tokio::test]
    async fn test_stale_expectation_is_concurrent_modification() {
        let (tracker, order_id) = tracker_with_order().await;

        tracker
            .advance(order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap();

        let err = tracker
            .advance(order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SagaError::ConcurrentModification {
                actual: SagaStep::PaymentPending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_advance_idempotent_absorbs_duplicate() {
        let (tracker, order_id) = tracker_with_order().await;

        tracker
            .advance(order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap();

        // A redelivered event tries the same edge again.
        let outcome = tracker
            .advance_idempotent(order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap();
        assert_eq!(outcome, AdvanceOutcome::AlreadyDone(SagaStep::PaymentPending));
    }

    #[tokio::test]
    async fn test_advance_idempotent_still_fails_when_behind() {
        let (tracker, order_id) = tracker_with_order().await;

        // Expecting payment_pending while the saga is still at created is
        // not a duplicate; the caller must re-read.
        let err = tracker
            .advance_idempotent(order_id, SagaStep::PaymentPending, SagaStep::PaymentProcessed)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::ConcurrentModification { .. }));
    }

    #[tokio::test]
    async fn test_failed_branch_sets_compensation() {
        let (tracker, order_id) = tracker_with_order().await;

        tracker
            .advance(order_id, SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap();
        let state = tracker
            .advance(order_id, SagaStep::PaymentPending, SagaStep::Failed)
            .await
            .unwrap();

        assert!(state.compensation_needed);
        assert!(state.is_terminal());
    }

    #[tokio::test]
    async fn test_missing_saga_is_not_found() {
        let tracker = SagaTracker::new(FakeStore::default());
        let err = tracker
            .advance(OrderId::new(), SagaStep::Created, SagaStep::PaymentPending)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::NotFound(_)));
    }
}
