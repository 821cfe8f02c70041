pub mod types;

pub use types::{Money, OrderId, PaymentId, PaymentMethod, UserId};
