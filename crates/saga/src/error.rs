//! Saga tracker error types.

use common::OrderId;
use thiserror::Error;

use crate::step::SagaStep;

/// Errors that can occur while reading or advancing saga state.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The stored step no longer matched the caller's expectation.
    ///
    /// Recoverable: re-read the state and decide whether the work is
    /// already done or must be redriven.
    #[error(
        "concurrent modification for order {order_id}: expected step {expected}, found {actual}"
    )]
    ConcurrentModification {
        order_id: OrderId,
        expected: SagaStep,
        actual: SagaStep,
    },

    /// The requested transition is not an edge of the step graph.
    #[error("illegal saga transition: {from} -> {to}")]
    IllegalTransition { from: SagaStep, to: SagaStep },

    /// No saga record exists for the order.
    #[error("no saga state for order {0}")]
    NotFound(OrderId),

    /// A saga record already exists for the order.
    #[error("saga state already exists for order {0}")]
    AlreadyExists(OrderId),

    /// The backing store failed.
    #[error("saga storage error: {0}")]
    Storage(String),
}

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;
