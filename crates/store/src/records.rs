//! Persisted record types.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, PaymentMethod, UserId};
use saga::SagaState;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
///
/// `Pending` on creation; only the order status updater moves it to `Paid`
/// or `Failed` after the payment outcome arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,

    /// Total in minor units; equals the sum of the line item subtotals.
    pub total: Money,

    pub delivery_address: String,
    pub payment_method: PaymentMethod,

    /// Populated when the order ends in `Failed`.
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line item belonging to exactly one order. Price and quantity are
/// immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItemRecord {
    pub order_id: OrderId,
    pub item_id: String,
    pub item_name: String,
    pub unit_price: Money,
    pub quantity: u32,

    /// unit_price * quantity, computed at creation.
    pub subtotal: Money,
}

impl OrderLineItemRecord {
    /// Creates a line item, computing the subtotal.
    pub fn new(
        order_id: OrderId,
        item_id: impl Into<String>,
        item_name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            order_id,
            item_id: item_id.into(),
            item_name: item_name.into(),
            unit_price,
            quantity,
            subtotal: unit_price.multiply(quantity),
        }
    }
}

/// Everything the order command handler writes in one atomic unit.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order: OrderRecord,
    pub line_items: Vec<OrderLineItemRecord>,
    pub outbox_event: NewOutboxEvent,
    pub saga_state: SagaState,
}

/// An outbox event to be appended alongside a state change.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    /// The order the event belongs to; doubles as the bus partition key.
    pub aggregate_id: OrderId,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// A persisted outbox event. Rows are append-only: once `processed` they
/// are never republished, but they stay for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: i64,
    pub aggregate_id: OrderId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,

    /// Lease timestamp set when a publisher claims the row. Expired leases
    /// make the row claimable again, so a crashed publisher cannot strand
    /// events.
    pub claimed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Returns true if the payment reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// A persisted payment; at most one per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,

    /// Derived deterministically from the order id, so a retried or
    /// redelivered processing run can never charge the same order twice.
    pub idempotency_key: String,

    /// The provider's transaction reference, set on completion.
    pub transaction_ref: Option<String>,

    /// Populated when the payment ends in `Failed`.
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a single physical call to the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttemptOutcome {
    Success,
    Failed,
}

impl AttemptOutcome {
    /// Returns the outcome name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "SUCCESS",
            AttemptOutcome::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(AttemptOutcome::Success),
            "FAILED" => Ok(AttemptOutcome::Failed),
            other => Err(format!("unknown attempt outcome: {other}")),
        }
    }
}

/// One row per physical provider call, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttemptRecord {
    pub id: i64,
    pub payment_id: PaymentId,

    /// Strictly increasing per payment, starting at 1.
    pub attempt_number: i32,

    /// None while the call is in flight.
    pub outcome: Option<AttemptOutcome>,

    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_roundtrip() {
        for status in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Failed] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("COOKING".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_payment_status_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }

    #[test]
    fn test_line_item_computes_subtotal() {
        let item = OrderLineItemRecord::new(
            OrderId::new(),
            "margherita",
            "Margherita",
            Money::from_minor_units(1500),
            3,
        );
        assert_eq!(item.subtotal, Money::from_minor_units(4500));
    }
}
