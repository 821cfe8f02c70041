//! Order domain: request validation, the command handler that opens a
//! saga, the status updater that closes it, and the event payloads in
//! between.

pub mod catalog;
pub mod error;
pub mod events;
pub mod handler;
pub mod status;

pub use catalog::{CatalogItem, CatalogService, InMemoryCatalog};
pub use error::{DomainError, Result};
pub use events::{
    ORDER_CREATED, ORDER_EVENTS_TOPIC, ORDER_STATUS_CHANGED, OrderCreatedEvent, OrderCreatedItem,
    OrderStatusChangedEvent, PAYMENT_COMPLETED, PAYMENT_EVENTS_TOPIC, PAYMENT_FAILED,
    PaymentCompletedEvent, PaymentFailedEvent, topic_for,
};
pub use handler::{OrderCommandHandler, OrderRequest, OrderRequestItem};
pub use status::OrderStatusUpdater;
