//! Menu catalog lookup.
//!
//! Prices always come from the catalog, never from the request, so a
//! client cannot name its own price.

use std::collections::HashMap;

use async_trait::async_trait;
use common::Money;

/// A purchasable menu item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub price: Money,
}

impl CatalogItem {
    /// Creates a catalog item.
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Money) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
        }
    }
}

/// Item lookup used by the order command handler.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Returns the item, or `None` if the id is unknown.
    async fn get_item(&self, item_id: &str) -> Option<CatalogItem>;
}

/// In-memory catalog with a fixed menu.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    items: HashMap<String, CatalogItem>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the given items.
    pub fn with_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        Self {
            items: items
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect(),
        }
    }

    /// Creates a catalog pre-seeded with the demo menu.
    pub fn seeded() -> Self {
        Self::with_items([
            CatalogItem::new("margherita", "Margherita", Money::from_minor_units(16500)),
            CatalogItem::new("pepperoni", "Pepperoni", Money::from_minor_units(18900)),
            CatalogItem::new("quattro-formaggi", "Quattro Formaggi", Money::from_minor_units(19900)),
            CatalogItem::new("tiramisu", "Tiramisu", Money::from_minor_units(8500)),
            CatalogItem::new("cola", "Cola", Money::from_minor_units(3300)),
        ])
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalog {
    async fn get_item(&self, item_id: &str) -> Option<CatalogItem> {
        self.items.get(item_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup() {
        let catalog = InMemoryCatalog::seeded();
        let item = catalog.get_item("margherita").await.unwrap();
        assert_eq!(item.price, Money::from_minor_units(16500));
        assert!(catalog.get_item("calzone").await.is_none());
    }
}
