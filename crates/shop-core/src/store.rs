//! # Storage Contract
//!
//! Entities are plain data; persistence goes through a [`Store`] that runs
//! synchronous units of work against a [`Tx`] view. A unit of work commits
//! every write on `Ok` and none on `Err`, and units against one store are
//! serialized: a guard checked inside `atomic` cannot be invalidated by a
//! concurrent writer before the unit commits.
//!
//! External provider calls never run inside `atomic`.

use crate::error::{ShopError, ShopResult};
use crate::order::{Order, OrderItem, OrderStatusHistory};
use crate::payment::{Payment, Transaction};
use crate::product::Product;
use uuid::Uuid;

/// Repository view available inside a unit of work
pub trait Tx {
    // orders

    fn order(&self, id: Uuid) -> ShopResult<Option<Order>>;

    fn order_by_number(&self, number: &str) -> ShopResult<Option<Order>>;

    /// Fails with `Conflict` when the order number is already taken
    fn insert_order(&mut self, order: &Order) -> ShopResult<()>;

    fn update_order(&mut self, order: &Order) -> ShopResult<()>;

    /// Next sequence for `{prefix}-{period}`, starting after the highest
    /// number already stored for that period
    fn next_order_sequence(&mut self, prefix: &str, period: &str) -> ShopResult<u32>;

    fn order_items(&self, order_id: Uuid) -> ShopResult<Vec<OrderItem>>;

    /// Fails with `Conflict` when the product already has a line in the order
    fn insert_order_item(&mut self, item: &OrderItem) -> ShopResult<()>;

    fn append_status_history(&mut self, entry: &OrderStatusHistory) -> ShopResult<()>;

    /// Oldest first
    fn status_history(&self, order_id: Uuid) -> ShopResult<Vec<OrderStatusHistory>>;

    // products

    fn product(&self, id: &str) -> ShopResult<Option<Product>>;

    fn upsert_product(&mut self, product: &Product) -> ShopResult<()>;

    // payments

    fn payment(&self, id: Uuid) -> ShopResult<Option<Payment>>;

    fn payment_by_external_id(
        &self,
        provider_code: &str,
        external_id: &str,
    ) -> ShopResult<Option<Payment>>;

    /// Newest first
    fn payments_for_order(&self, order_id: Uuid) -> ShopResult<Vec<Payment>>;

    fn insert_payment(&mut self, payment: &Payment) -> ShopResult<()>;

    fn update_payment(&mut self, payment: &Payment) -> ShopResult<()>;

    fn insert_transaction(&mut self, transaction: &Transaction) -> ShopResult<()>;

    /// Settle a pending reservation
    fn update_transaction(&mut self, transaction: &Transaction) -> ShopResult<()>;

    /// Oldest first
    fn transactions(&self, payment_id: Uuid) -> ShopResult<Vec<Transaction>>;

    // lookups that must succeed

    fn require_order(&self, id: Uuid) -> ShopResult<Order> {
        self.order(id)?.ok_or_else(|| ShopError::OrderNotFound {
            reference: id.to_string(),
        })
    }

    fn require_order_by_number(&self, number: &str) -> ShopResult<Order> {
        self.order_by_number(number)?
            .ok_or_else(|| ShopError::OrderNotFound {
                reference: number.to_string(),
            })
    }

    fn require_payment(&self, id: Uuid) -> ShopResult<Payment> {
        self.payment(id)?.ok_or_else(|| ShopError::PaymentNotFound {
            reference: id.to_string(),
        })
    }

    fn require_product(&self, id: &str) -> ShopResult<Product> {
        self.product(id)?.ok_or_else(|| ShopError::ProductNotFound {
            product_id: id.to_string(),
        })
    }
}

/// Transactional storage backend
pub trait Store: Send + Sync {
    /// Run `work` as one unit: all writes land on `Ok`, none on `Err`.
    fn atomic<T, F>(&self, work: F) -> ShopResult<T>
    where
        F: FnOnce(&mut dyn Tx) -> ShopResult<T>;

    /// Read-only unit of work
    fn read<T, F>(&self, work: F) -> ShopResult<T>
    where
        F: FnOnce(&dyn Tx) -> ShopResult<T>,
    {
        self.atomic(|tx| work(tx))
    }
}
