//! # Cart
//!
//! Pre-order line items owned by a registered user or an anonymous session.
//! The order core only reads carts through [`CartView`]; clearing a cart after
//! checkout is the caller's job.

use crate::error::{ShopError, ShopResult};
use crate::product::Product;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cart line as seen by checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
    /// Price at the time the item was added
    pub unit_price: Decimal,
}

impl CartLine {
    pub fn total_price(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Read-only cart contract consumed by order creation
pub trait CartView {
    fn lines(&self) -> Vec<CartLine>;

    fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }
}

/// Who a cart belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartOwner {
    User(Uuid),
    Session(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub owner: CartOwner,
    items: Vec<CartLine>,
}

impl Cart {
    pub fn new(owner: CartOwner) -> Self {
        Self {
            owner,
            items: Vec::new(),
        }
    }

    pub fn for_session(session_key: impl Into<String>) -> Self {
        Self::new(CartOwner::Session(session_key.into()))
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self::new(CartOwner::User(user_id))
    }

    pub fn items(&self) -> &[CartLine] {
        &self.items
    }

    /// Add a product or bump the quantity of its existing line.
    /// Tracked products cannot exceed stock on hand.
    pub fn add_item(&mut self, product: &Product, quantity: u32) -> ShopResult<&CartLine> {
        if quantity == 0 {
            return Err(ShopError::Validation("Quantity must be at least 1".into()));
        }
        if !product.active {
            return Err(ShopError::Validation(format!(
                "Product is not available: {}",
                product.id
            )));
        }

        let existing = self.position(&product.id);
        let current = existing.map(|i| self.items[i].quantity).unwrap_or(0);
        let wanted = current.saturating_add(quantity);
        if !product.can_supply(wanted) {
            return Err(ShopError::InsufficientStock {
                product_id: product.id.clone(),
                requested: wanted,
                available: product.stock_quantity,
            });
        }

        let index = match existing {
            Some(i) => {
                self.items[i].quantity = wanted;
                i
            }
            None => {
                self.items.push(CartLine {
                    product_id: product.id.clone(),
                    quantity,
                    unit_price: product.price,
                });
                self.items.len() - 1
            }
        };
        Ok(&self.items[index])
    }

    pub fn remove_item(&mut self, product_id: &str) {
        self.items.retain(|line| line.product_id != product_id);
    }

    /// Set a line's quantity; zero removes the line.
    pub fn update_item_quantity(&mut self, product_id: &str, quantity: u32) -> ShopResult<()> {
        if quantity == 0 {
            self.remove_item(product_id);
            return Ok(());
        }
        let index = self
            .position(product_id)
            .ok_or_else(|| ShopError::ProductNotFound {
                product_id: product_id.to_string(),
            })?;
        self.items[index].quantity = quantity;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Fold another cart (e.g. the anonymous one at login) into this one.
    pub fn merge_with(&mut self, other: Cart) {
        for line in other.items {
            match self.position(&line.product_id) {
                Some(i) => {
                    let merged = self.items[i].quantity.saturating_add(line.quantity);
                    self.items[i].quantity = merged;
                }
                None => self.items.push(line),
            }
        }
    }

    pub fn total_items(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |n, line| n.saturating_add(line.quantity))
    }

    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(CartLine::total_price).sum()
    }

    fn position(&self, product_id: &str) -> Option<usize> {
        self.items.iter().position(|line| line.product_id == product_id)
    }
}

impl CartView for Cart {
    fn lines(&self) -> Vec<CartLine> {
        self.items.clone()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
