//! Transactional outbox publication.
//!
//! Writers append events to the outbox inside their own transactions; the
//! [`OutboxPublisher`] here is the only component that moves those rows to
//! the bus.

pub mod publisher;

pub use publisher::{OutboxPublisher, PublisherConfig};
