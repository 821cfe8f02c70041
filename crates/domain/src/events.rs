//! Event payloads exchanged between saga participants.
//!
//! These shapes are the public contract on the bus: notification and
//! analytics consumers parse them, so field names (camelCase) and topics
//! are stable.

use bus::BusMessage;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, PaymentMethod, UserId};
use serde::{Deserialize, Serialize};
use store::{NewOutboxEvent, OrderStatus, PaymentStatus};

/// Topic carrying order lifecycle events.
pub const ORDER_EVENTS_TOPIC: &str = "order-events";
/// Topic carrying payment outcome events.
pub const PAYMENT_EVENTS_TOPIC: &str = "payment-events";

pub const ORDER_CREATED: &str = "OrderCreated";
pub const ORDER_STATUS_CHANGED: &str = "OrderStatusChanged";
pub const PAYMENT_COMPLETED: &str = "PaymentCompleted";
pub const PAYMENT_FAILED: &str = "PaymentFailed";

/// Maps an event type to the topic it is published on.
pub fn topic_for(event_type: &str) -> &'static str {
    match event_type {
        PAYMENT_COMPLETED | PAYMENT_FAILED => PAYMENT_EVENTS_TOPIC,
        _ => ORDER_EVENTS_TOPIC,
    }
}

/// Line item as carried inside [`OrderCreatedEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedItem {
    pub item_id: String,
    pub item_name: String,
    pub unit_price: Money,
    pub quantity: u32,
    pub subtotal: Money,
}

/// Published when an order (and its saga) has been created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total: Money,
    pub items: Vec<OrderCreatedItem>,
    pub payment_method: PaymentMethod,
    pub timestamp: DateTime<Utc>,
}

/// Published by the payment processor after a successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompletedEvent {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub transaction_id: String,
}

/// Published by the payment processor when a charge is given up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailedEvent {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub failure_reason: String,
}

/// Appended to the outbox whenever the order status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChangedEvent {
    pub order_id: OrderId,
    pub new_status: OrderStatus,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

macro_rules! event_conversions {
    ($ty:ty, $event_type:expr) => {
        impl $ty {
            /// The event type name carried on the wire.
            pub const EVENT_TYPE: &'static str = $event_type;

            /// Wraps the payload as an outbox row for this order.
            pub fn to_outbox_event(&self) -> serde_json::Result<NewOutboxEvent> {
                Ok(NewOutboxEvent {
                    aggregate_id: self.order_id,
                    event_type: Self::EVENT_TYPE.to_string(),
                    payload: serde_json::to_value(self)?,
                })
            }

            /// Wraps the payload as a bus message, keyed by order id.
            pub fn to_bus_message(&self) -> serde_json::Result<BusMessage> {
                Ok(BusMessage::new(
                    topic_for(Self::EVENT_TYPE),
                    self.order_id.to_string(),
                    Self::EVENT_TYPE,
                    serde_json::to_value(self)?,
                ))
            }
        }
    };
}

event_conversions!(OrderCreatedEvent, ORDER_CREATED);
event_conversions!(PaymentCompletedEvent, PAYMENT_COMPLETED);
event_conversions!(PaymentFailedEvent, PAYMENT_FAILED);
event_conversions!(OrderStatusChangedEvent, ORDER_STATUS_CHANGED);
