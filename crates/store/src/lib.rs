//! Persistence layer for orders, the transactional outbox, payments and
//! saga state.
//!
//! The traits in [`repo`] are the only surface the rest of the system
//! talks to; [`PostgresStore`] is the production implementation and
//! [`InMemoryStore`] backs unit tests and single-process runs.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod repo;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    AttemptOutcome, NewOrder, NewOutboxEvent, OrderLineItemRecord, OrderRecord, OrderStatus,
    OutboxRecord, PaymentAttemptRecord, PaymentRecord, PaymentStatus,
};
pub use repo::{OrderStore, OutboxStore, PaymentStore};
