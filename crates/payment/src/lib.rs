//! Payment processing for the order saga.
//!
//! One payment per order, one idempotency key per payment, retries with
//! backoff for transient provider trouble, and a shared circuit breaker
//! so a degraded provider cannot be hammered by a backlog of orders.

pub mod breaker;
pub mod error;
pub mod gateway;
pub mod processor;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use error::{PaymentError, Result};
pub use gateway::{ChargeReceipt, ChargeRequest, GatewayError, MockGateway, PaymentGateway};
pub use processor::{PaymentProcessor, idempotency_key};
pub use retry::RetryPolicy;
