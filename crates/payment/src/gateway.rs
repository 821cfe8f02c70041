//! The external payment provider boundary.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{Money, OrderId, PaymentMethod};
use thiserror::Error;

/// A charge instruction for the provider.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub payment_method: PaymentMethod,

    /// Deterministic per order. The provider dedupes on it, so a retried
    /// or redelivered charge can never bill twice.
    pub idempotency_key: String,
}

/// The provider's acknowledgement of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub transaction_id: String,
}

/// Failure modes of a charge call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No answer within the call deadline.
    #[error("gateway request timed out")]
    Timeout,

    /// The provider was unreachable.
    #[error("gateway connection failed: {0}")]
    Connection(String),

    /// The provider answered with a server-side error.
    #[error("gateway server error (status {0})")]
    Server(u16),

    /// The provider authoritatively declined the charge. Retrying cannot
    /// change the answer.
    #[error("charge rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Whether a retry of the same charge could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, GatewayError::Rejected(_))
    }
}

/// A payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Attempts the charge once. Implementations must honor the
    /// idempotency key.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError>;
}

/// Scriptable gateway for tests and local runs.
///
/// Failures queued with [`enqueue_failure`](MockGateway::enqueue_failure)
/// are consumed one per call, in order; once the queue is empty every call
/// succeeds.
#[derive(Clone, Default)]
pub struct MockGateway {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    scripted_failures: VecDeque<GatewayError>,
    calls: Vec<ChargeRequest>,
    next_txn: u64,
}

impl MockGateway {
    /// Creates a gateway that approves every charge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failure for an upcoming call.
    pub fn enqueue_failure(&self, error: GatewayError) {
        self.inner
            .lock()
            .expect("mock gateway lock poisoned")
            .scripted_failures
            .push_back(error);
    }

    /// Returns every charge request received so far.
    pub fn calls(&self) -> Vec<ChargeRequest> {
        self.inner
            .lock()
            .expect("mock gateway lock poisoned")
            .calls
            .clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        let mut inner = self.inner.lock().expect("mock gateway lock poisoned");
        inner.calls.push(request.clone());

        if let Some(error) = inner.scripted_failures.pop_front() {
            return Err(error);
        }
        inner.next_txn += 1;
        Ok(ChargeReceipt {
            transaction_id: format!("txn-{:08}", inner.next_txn),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Connection("refused".to_string()).is_transient());
        assert!(GatewayError::Server(503).is_transient());
        assert!(!GatewayError::Rejected("insufficient funds".to_string()).is_transient());
    }

    #[tokio::test]
    async fn test_mock_replays_script_then_succeeds() {
        let gateway = MockGateway::new();
        gateway.enqueue_failure(GatewayError::Timeout);

        let request = ChargeRequest {
            order_id: OrderId::new(),
            amount: Money::from_minor_units(1000),
            payment_method: PaymentMethod::Card,
            idempotency_key: "key".to_string(),
        };

        assert!(matches!(
            gateway.charge(&request).await,
            Err(GatewayError::Timeout)
        ));
        let receipt = gateway.charge(&request).await.unwrap();
        assert!(receipt.transaction_id.starts_with("txn-"));
        assert_eq!(gateway.calls().len(), 2);
    }
}
