//! Saga progress tracking for the order choreography.
//!
//! There is no central orchestrator: each participant (order command
//! handler, payment processor, order status updater) reacts to events and
//! records its progress here. This crate is the single place that knows
//! which step transitions are legal:
//!
//! ```text
//! created ──► payment_pending ──┬──► payment_processed ──► completed
//!                               └──► failed  (compensation_needed)
//! ```
//!
//! Advancing is a conditional update keyed on the expected current step, so
//! concurrent participants cannot clobber each other. A stale expectation
//! surfaces as [`SagaError::ConcurrentModification`], letting the caller
//! re-read and decide whether the work is already done.

pub mod error;
pub mod state;
pub mod step;
pub mod tracker;

pub use error::SagaError;
pub use state::SagaState;
pub use step::SagaStep;
pub use tracker::{AdvanceOutcome, SagaStateStore, SagaTracker};
