use thiserror::Error;

/// Errors that can occur while processing a payment.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] store::StoreError),

    /// The saga state could not be read or advanced.
    #[error(transparent)]
    Saga(#[from] saga::SagaError),

    /// An event payload could not be serialized or deserialized.
    #[error("event payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Result type for payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;
