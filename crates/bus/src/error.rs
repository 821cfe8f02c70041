use thiserror::Error;

/// Errors surfaced by a message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker refused or lost the message.
    #[error("publish to topic {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// The broker did not acknowledge within the publish timeout.
    #[error("publish to topic {topic} timed out")]
    Timeout { topic: String },

    /// The bus has been shut down.
    #[error("bus is closed")]
    Closed,
}

/// Errors returned by event handlers, classified for redelivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Worth redelivering: the same message may succeed later.
    #[error("transient handler failure: {0}")]
    Transient(String),

    /// Redelivery cannot help; the message is skipped after logging.
    #[error("permanent handler failure: {0}")]
    Permanent(String),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
