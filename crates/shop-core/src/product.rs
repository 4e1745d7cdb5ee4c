//! # Product Records
//!
//! The slice of the catalog the order core needs: snapshot fields for order
//! items, the current price for carts, and inventory counters.
//! Records are seeded from `config/products.toml`.

use crate::error::{ShopError, ShopResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A product as seen by carts, orders and stock adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Unique product identifier (e.g., "tee-classic-m")
    pub id: String,

    /// Stock keeping unit
    pub sku: String,

    /// Display name
    pub name: String,

    /// Short description
    #[serde(default)]
    pub description: String,

    /// Current unit price in major units
    pub price: Decimal,

    /// Whether stock is counted for this product
    #[serde(default = "default_true")]
    pub track_inventory: bool,

    /// Units on hand
    #[serde(default)]
    pub stock_quantity: u32,

    /// Whether this product is available for purchase
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            sku: sku.into(),
            name: name.into(),
            description: String::new(),
            price,
            track_inventory: true,
            stock_quantity: 0,
            active: true,
        }
    }

    /// Builder: set description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: set stock on hand
    pub fn with_stock(mut self, quantity: u32) -> Self {
        self.stock_quantity = quantity;
        self
    }

    /// Builder: disable inventory tracking
    pub fn untracked(mut self) -> Self {
        self.track_inventory = false;
        self
    }

    /// Whether `quantity` more units can be sold
    pub fn can_supply(&self, quantity: u32) -> bool {
        !self.track_inventory || self.stock_quantity >= quantity
    }

    /// Remove sold units. Returns false (and leaves stock alone) when the
    /// product is tracked and stock is insufficient.
    pub fn decrement_stock(&mut self, quantity: u32) -> bool {
        if !self.track_inventory {
            return false;
        }
        if self.stock_quantity < quantity {
            return false;
        }
        self.stock_quantity -= quantity;
        true
    }

    /// Put units back on hand (tracked products only).
    pub fn restore_stock(&mut self, quantity: u32) -> bool {
        if !self.track_inventory {
            return false;
        }
        self.stock_quantity = self.stock_quantity.saturating_add(quantity);
        true
    }
}

/// Product records loaded from config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductCatalog {
    #[serde(default)]
    pub products: Vec<Product>,
}

impl ProductCatalog {
    pub fn new() -> Self {
        Self {
            products: Vec::new(),
        }
    }

    pub fn add(&mut self, product: Product) {
        self.products.push(product);
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> ShopResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ShopError::Configuration(format!("Invalid product catalog: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stock_adjustment() {
        let mut product = Product::new("mug", "MUG-01", "Mug", dec!(9.50)).with_stock(3);

        assert!(product.decrement_stock(2));
        assert_eq!(product.stock_quantity, 1);

        // insufficient stock is skipped, not clamped
        assert!(!product.decrement_stock(2));
        assert_eq!(product.stock_quantity, 1);

        assert!(product.restore_stock(2));
        assert_eq!(product.stock_quantity, 3);
    }

    #[test]
    fn test_untracked_products_are_never_adjusted() {
        let mut product = Product::new("ebook", "EB-01", "E-book", dec!(5)).untracked();

        assert!(product.can_supply(1_000));
        assert!(!product.decrement_stock(1));
        assert!(!product.restore_stock(1));
        assert_eq!(product.stock_quantity, 0);
    }

    #[test]
    fn test_catalog_from_toml() {
        let catalog = ProductCatalog::from_toml(
            r#"
            [[products]]
            id = "tee"
            sku = "TEE-M"
            name = "T-Shirt"
            price = "10.00"
            stock_quantity = 12

            [[products]]
            id = "gift-card"
            sku = "GC-25"
            name = "Gift card"
            price = "25.00"
            track_inventory = false
            "#,
        )
        .unwrap();

        assert_eq!(catalog.products.len(), 2);
        let tee = catalog.get("tee").unwrap();
        assert_eq!(tee.price, dec!(10.00));
        assert!(tee.track_inventory);
        assert!(!catalog.get("gift-card").unwrap().track_inventory);
    }
}
