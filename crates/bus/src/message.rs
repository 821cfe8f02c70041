//! The unit of exchange between saga participants.

use serde::{Deserialize, Serialize};

/// A message on a topic.
///
/// `key` is the partition key; messages sharing a key are delivered to a
/// consumer in publish order. For saga events the key is always the order
/// id, so every event for one order arrives in sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub key: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BusMessage {
    /// Creates a message.
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}
