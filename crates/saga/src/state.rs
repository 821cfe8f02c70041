//! Per-order saga progress record.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::step::SagaStep;

/// The persisted progress record for one order's saga (1:1 with the order).
///
/// `version` increments on every successful advance and backs the
/// optimistic concurrency check in the store implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaState {
    /// The order this saga belongs to.
    pub order_id: OrderId,

    /// The step the saga is currently at.
    pub current_step: SagaStep,

    /// Steps completed so far, in completion order.
    pub steps_completed: Vec<SagaStep>,

    /// Set when the saga took the failure branch and prior effects need
    /// corrective handling.
    pub compensation_needed: bool,

    /// Monotonic version, bumped on every advance.
    pub version: i64,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    /// Creates the initial record for a freshly placed order.
    pub fn initial(order_id: OrderId) -> Self {
        Self {
            order_id,
            current_step: SagaStep::Created,
            steps_completed: vec![SagaStep::Created],
            compensation_needed: false,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Returns the record after advancing to `next`.
    ///
    /// Callers must have validated the transition; this only performs the
    /// bookkeeping (step list, compensation flag, version bump).
    pub fn advanced_to(&self, next: SagaStep) -> Self {
        let mut steps_completed = self.steps_completed.clone();
        steps_completed.push(next);
        Self {
            order_id: self.order_id,
            current_step: next,
            steps_completed,
            compensation_needed: self.compensation_needed || next == SagaStep::Failed,
            version: self.version + 1,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if the saga is at a terminal step.
    pub fn is_terminal(&self) -> bool {
        self.current_step.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let order_id = OrderId::new();
        let state = SagaState::initial(order_id);

        assert_eq!(state.order_id, order_id);
        assert_eq!(state.current_step, SagaStep::Created);
        assert_eq!(state.steps_completed, vec![SagaStep::Created]);
        assert!(!state.compensation_needed);
        assert_eq!(state.version, 1);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_advanced_to_appends_and_bumps_version() {
        let state = SagaState::initial(OrderId::new());
        let next = state.advanced_to(SagaStep::PaymentPending);

        assert_eq!(next.current_step, SagaStep::PaymentPending);
        assert_eq!(
            next.steps_completed,
            vec![SagaStep::Created, SagaStep::PaymentPending]
        );
        assert_eq!(next.version, 2);
        assert!(!next.compensation_needed);
    }

    #[test]
    fn test_advancing_to_failed_sets_compensation() {
        let state = SagaState::initial(OrderId::new()).advanced_to(SagaStep::PaymentPending);
        let failed = state.advanced_to(SagaStep::Failed);

        assert!(failed.compensation_needed);
        assert!(failed.is_terminal());
    }
}
