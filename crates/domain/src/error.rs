use store::StoreError;
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The order request failed validation; nothing was written.
    #[error("invalid order request: {0}")]
    Validation(String),

    /// The request referenced an item the catalog does not know.
    #[error("unknown catalog item: {0}")]
    UnknownItem(String),

    /// The persistence layer failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The saga state could not be read or advanced.
    #[error(transparent)]
    Saga(#[from] saga::SagaError),

    /// An event payload could not be serialized or deserialized.
    #[error("event payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
