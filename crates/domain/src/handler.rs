//! The order command handler: the saga's entry point.

use std::sync::Arc;

use chrono::Utc;
use common::{Money, OrderId, PaymentMethod, UserId};
use saga::SagaState;
use store::{NewOrder, OrderLineItemRecord, OrderRecord, OrderStatus, OrderStore};

use crate::catalog::CatalogService;
use crate::error::{DomainError, Result};
use crate::events::{OrderCreatedEvent, OrderCreatedItem};

/// An incoming order request, untrusted.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub items: Vec<OrderRequestItem>,
    pub delivery_address: String,
    pub payment_method: PaymentMethod,
}

/// One requested item. Quantity only; the price comes from the catalog.
#[derive(Debug, Clone)]
pub struct OrderRequestItem {
    pub item_id: String,
    pub quantity: u32,
}

/// Validates order requests and writes the order, its line items, the
/// `OrderCreated` outbox event and the initial saga state in one atomic
/// store unit. Everything downstream is driven by that single write.
pub struct OrderCommandHandler<S> {
    store: S,
    catalog: Arc<dyn CatalogService>,
}

impl<S: OrderStore> OrderCommandHandler<S> {
    /// Creates a handler over the given store and catalog.
    pub fn new(store: S, catalog: Arc<dyn CatalogService>) -> Self {
        Self { store, catalog }
    }

    /// Creates an order.
    ///
    /// On success the order is `Pending` and the saga sits at `created`;
    /// on any error nothing is visible.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_order(&self, request: OrderRequest) -> Result<OrderRecord> {
        self.validate(&request)?;

        let order_id = OrderId::new();
        let now = Utc::now();

        let mut line_items = Vec::with_capacity(request.items.len());
        for requested in &request.items {
            let item = self
                .catalog
                .get_item(&requested.item_id)
                .await
                .ok_or_else(|| DomainError::UnknownItem(requested.item_id.clone()))?;
            line_items.push(OrderLineItemRecord::new(
                order_id,
                item.id,
                item.name,
                item.price,
                requested.quantity,
            ));
        }
        let total: Money = line_items.iter().map(|i| i.subtotal).sum();

        let order = OrderRecord {
            id: order_id,
            user_id: request.user_id,
            status: OrderStatus::Pending,
            total,
            delivery_address: request.delivery_address,
            payment_method: request.payment_method,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let event = OrderCreatedEvent {
            order_id,
            user_id: order.user_id,
            total,
            items: line_items
                .iter()
                .map(|i| OrderCreatedItem {
                    item_id: i.item_id.clone(),
                    item_name: i.item_name.clone(),
                    unit_price: i.unit_price,
                    quantity: i.quantity,
                    subtotal: i.subtotal,
                })
                .collect(),
            payment_method: order.payment_method,
            timestamp: now,
        };

        self.store
            .create_order(NewOrder {
                order: order.clone(),
                line_items,
                outbox_event: event.to_outbox_event()?,
                saga_state: SagaState::initial(order_id),
            })
            .await?;

        metrics::counter!("orders_created").increment(1);
        tracing::info!(%order_id, %total, "order created");
        Ok(order)
    }

    fn validate(&self, request: &OrderRequest) -> Result<()> {
        if request.items.is_empty() {
            return Err(DomainError::Validation(
                "order must contain at least one item".to_string(),
            ));
        }
        if request.items.iter().any(|i| i.quantity == 0) {
            return Err(DomainError::Validation(
                "item quantities must be at least 1".to_string(),
            ));
        }
        if request.delivery_address.trim().is_empty() {
            return Err(DomainError::Validation(
                "delivery address must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
