//! Topic-based messaging between saga participants.
//!
//! Delivery is at-least-once: handlers see redeliveries and must be
//! idempotent. Ordering holds per key, which for saga traffic means per
//! order.

pub mod bus;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;

pub use bus::{MessageBus, Subscription};
pub use consumer::{Consumer, ConsumerConfig, EventHandler};
pub use error::{BusError, HandlerError, Result};
pub use memory::InMemoryBus;
pub use message::BusMessage;
