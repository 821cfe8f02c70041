use common::{OrderId, PaymentId};
use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order was not found.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order with this ID already exists.
    #[error("order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The payment was not found.
    #[error("payment not found: {0}")]
    PaymentNotFound(PaymentId),

    /// A payment already exists for this order (unique on order id).
    #[error("payment already exists for order {0}")]
    DuplicatePayment(OrderId),

    /// The payment attempt was not found.
    #[error("payment attempt not found: {0}")]
    AttemptNotFound(i64),

    /// The outbox event was not found.
    #[error("outbox event not found: {0}")]
    OutboxEventNotFound(i64),

    /// A stored value could not be decoded into its domain type.
    #[error("invalid stored value: {0}")]
    Decode(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for saga::SagaError {
    fn from(e: StoreError) -> Self {
        saga::SagaError::Storage(e.to_string())
    }
}
