//! Saga step graph.

use serde::{Deserialize, Serialize};

/// A step in the order saga.
///
/// The step only ever advances forward along the graph edges; terminal
/// steps (`Completed`, `Failed`) never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    /// Order and its initial records were persisted.
    #[default]
    Created,

    /// Payment record exists; the charge is being driven.
    PaymentPending,

    /// The charge succeeded and the terminal payment event was emitted.
    PaymentProcessed,

    /// The order reached its final paid state (terminal).
    Completed,

    /// Payment failed; compensation is signaled (terminal).
    Failed,
}

impl SagaStep {
    /// Returns true if this is a terminal step.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStep::Completed | SagaStep::Failed)
    }

    /// Returns true if `next` is a legal transition from this step.
    ///
    /// This table is the authoritative definition of the saga graph.
    pub fn can_transition_to(&self, next: SagaStep) -> bool {
        matches!(
            (self, next),
            (SagaStep::Created, SagaStep::PaymentPending)
                | (SagaStep::PaymentPending, SagaStep::PaymentProcessed)
                | (SagaStep::PaymentPending, SagaStep::Failed)
                | (SagaStep::PaymentProcessed, SagaStep::Completed)
        )
    }

    /// Returns true if this step means the work of reaching `target` is
    /// already behind us, either because we are at `target` or further
    /// along (a terminal step counts as "past" everything).
    pub fn has_reached(&self, target: SagaStep) -> bool {
        if self == &target {
            return true;
        }
        if self.is_terminal() {
            return true;
        }
        self.rank() >= target.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            SagaStep::Created => 0,
            SagaStep::PaymentPending => 1,
            SagaStep::PaymentProcessed => 2,
            SagaStep::Completed | SagaStep::Failed => 3,
        }
    }

    /// Returns the step name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Created => "created",
            SagaStep::PaymentPending => "payment_pending",
            SagaStep::PaymentProcessed => "payment_processed",
            SagaStep::Completed => "completed",
            SagaStep::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SagaStep::Created),
            "payment_pending" => Ok(SagaStep::PaymentPending),
            "payment_processed" => Ok(SagaStep::PaymentProcessed),
            "completed" => Ok(SagaStep::Completed),
            "failed" => Ok(SagaStep::Failed),
            other => Err(format!("unknown saga step: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_step_is_created() {
        assert_eq!(SagaStep::default(), SagaStep::Created);
    }

    #[test]
    fn test_legal_transitions() {
        assert!(SagaStep::Created.can_transition_to(SagaStep::PaymentPending));
        assert!(SagaStep::PaymentPending.can_transition_to(SagaStep::PaymentProcessed));
        assert!(SagaStep::PaymentPending.can_transition_to(SagaStep::Failed));
        assert!(SagaStep::PaymentProcessed.can_transition_to(SagaStep::Completed));
    }

    #[test]
    fn test_no_regression() {
        assert!(!SagaStep::PaymentPending.can_transition_to(SagaStep::Created));
        assert!(!SagaStep::PaymentProcessed.can_transition_to(SagaStep::PaymentPending));
        assert!(!SagaStep::Completed.can_transition_to(SagaStep::PaymentProcessed));
        assert!(!SagaStep::Failed.can_transition_to(SagaStep::PaymentPending));
    }

    #[test]
    fn test_terminal_steps_have_no_exits() {
        for next in [
            SagaStep::Created,
            SagaStep::PaymentPending,
            SagaStep::PaymentProcessed,
            SagaStep::Completed,
            SagaStep::Failed,
        ] {
            assert!(!SagaStep::Completed.can_transition_to(next));
            assert!(!SagaStep::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_terminal() {
        assert!(!SagaStep::Created.is_terminal());
        assert!(!SagaStep::PaymentPending.is_terminal());
        assert!(!SagaStep::PaymentProcessed.is_terminal());
        assert!(SagaStep::Completed.is_terminal());
        assert!(SagaStep::Failed.is_terminal());
    }

    #[test]
    fn test_has_reached() {
        assert!(SagaStep::PaymentPending.has_reached(SagaStep::PaymentPending));
        assert!(SagaStep::PaymentProcessed.has_reached(SagaStep::PaymentPending));
        assert!(!SagaStep::Created.has_reached(SagaStep::PaymentPending));
        // A failed saga is past everything: the success-path work is moot.
        assert!(SagaStep::Failed.has_reached(SagaStep::PaymentProcessed));
        assert!(SagaStep::Completed.has_reached(SagaStep::Failed));
    }

    #[test]
    fn test_str_roundtrip() {
        for step in [
            SagaStep::Created,
            SagaStep::PaymentPending,
            SagaStep::PaymentProcessed,
            SagaStep::Completed,
            SagaStep::Failed,
        ] {
            assert_eq!(step.as_str().parse::<SagaStep>().unwrap(), step);
        }
        assert!("cooking".parse::<SagaStep>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&SagaStep::PaymentPending).unwrap();
        assert_eq!(json, "\"payment_pending\"");
    }
}
