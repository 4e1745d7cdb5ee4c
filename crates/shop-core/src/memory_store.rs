//! # In-Memory Store
//!
//! [`Store`] backed by process memory. A unit of work runs against a copy of
//! the tables under one mutex and the copy replaces the live tables only when
//! the work returns `Ok`.
//!
//! The transaction ledger only grows, so it is moved into the unit instead
//! of copied, and a failed unit replays an undo log over it. Every other
//! table is copied per unit, which keeps write cost proportional to the
//! number of orders, payments and products held.
//!
//! Intended for tests/dev and the demo binary.

use crate::error::{ShopError, ShopResult};
use crate::order::{parse_order_sequence, Order, OrderItem, OrderStatusHistory};
use crate::payment::{Payment, Transaction};
use crate::product::{Product, ProductCatalog};
use crate::store::{Store, Tx};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    order_numbers: HashMap<String, Uuid>,
    sequences: HashMap<String, u32>,
    order_items: Vec<OrderItem>,
    status_history: Vec<OrderStatusHistory>,
    products: HashMap<String, Product>,
    payments: Vec<Payment>,
    ledger: Ledger,
}

/// Transactions plus the undo log of the running unit
#[derive(Debug, Clone, Default)]
struct Ledger {
    rows: Vec<Transaction>,
    undo: Vec<LedgerUndo>,
}

#[derive(Debug, Clone)]
enum LedgerUndo {
    Inserted,
    Updated(usize, Transaction),
}

impl Ledger {
    fn rollback(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                LedgerUndo::Inserted => {
                    self.rows.pop();
                }
                LedgerUndo::Updated(index, previous) => self.rows[index] = previous,
            }
        }
    }
}

impl Tables {
    /// Working copy for one unit; takes the ledger instead of copying it
    fn fork(&mut self) -> Tables {
        let ledger = std::mem::take(&mut self.ledger);
        let mut draft = self.clone();
        draft.ledger = ledger;
        draft
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with the catalog's product records
    pub fn with_catalog(catalog: &ProductCatalog) -> ShopResult<Self> {
        let store = Self::new();
        store.atomic(|tx| {
            for product in &catalog.products {
                tx.upsert_product(product)?;
            }
            Ok(())
        })?;
        Ok(store)
    }
}

fn lock_poisoned<T>(_: T) -> ShopError {
    error!("memory store lock poisoned");
    ShopError::Storage("lock poisoned".to_string())
}

impl Store for MemoryStore {
    fn atomic<T, F>(&self, work: F) -> ShopResult<T>
    where
        F: FnOnce(&mut dyn Tx) -> ShopResult<T>,
    {
        let mut live = self.tables.lock().map_err(lock_poisoned)?;
        let mut draft = live.fork();
        match work(&mut draft) {
            Ok(value) => {
                draft.ledger.undo.clear();
                *live = draft;
                Ok(value)
            }
            Err(e) => {
                draft.ledger.rollback();
                live.ledger = draft.ledger;
                Err(e)
            }
        }
    }

    fn read<T, F>(&self, work: F) -> ShopResult<T>
    where
        F: FnOnce(&dyn Tx) -> ShopResult<T>,
    {
        let live = self.tables.lock().map_err(lock_poisoned)?;
        work(&*live)
    }
}

impl Tx for Tables {
    fn order(&self, id: Uuid) -> ShopResult<Option<Order>> {
        Ok(self.orders.get(&id).cloned())
    }

    fn order_by_number(&self, number: &str) -> ShopResult<Option<Order>> {
        Ok(self
            .order_numbers
            .get(number)
            .and_then(|id| self.orders.get(id))
            .cloned())
    }

    fn insert_order(&mut self, order: &Order) -> ShopResult<()> {
        if self.order_numbers.contains_key(&order.number) {
            return Err(ShopError::Conflict(format!(
                "order number {} already exists",
                order.number
            )));
        }
        if self.orders.contains_key(&order.id) {
            return Err(ShopError::Conflict(format!("order {} already exists", order.id)));
        }
        self.order_numbers.insert(order.number.clone(), order.id);
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn update_order(&mut self, order: &Order) -> ShopResult<()> {
        let slot = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| ShopError::OrderNotFound {
                reference: order.id.to_string(),
            })?;
        if slot.number != order.number {
            return Err(ShopError::Storage(format!(
                "order number of {} cannot change",
                order.id
            )));
        }
        *slot = order.clone();
        Ok(())
    }

    fn next_order_sequence(&mut self, prefix: &str, period: &str) -> ShopResult<u32> {
        let key = format!("{}-{}", prefix, period);
        let highest_stored = || {
            self.order_numbers
                .keys()
                .filter_map(|number| parse_order_sequence(number, prefix, period))
                .max()
                .unwrap_or(0)
        };
        let current = match self.sequences.get(&key) {
            Some(value) => *value,
            None => highest_stored(),
        };
        let next = current + 1;
        self.sequences.insert(key, next);
        Ok(next)
    }

    fn order_items(&self, order_id: Uuid) -> ShopResult<Vec<OrderItem>> {
        Ok(self
            .order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect())
    }

    fn insert_order_item(&mut self, item: &OrderItem) -> ShopResult<()> {
        let duplicate = self
            .order_items
            .iter()
            .any(|existing| existing.order_id == item.order_id && existing.product_id == item.product_id);
        if duplicate {
            return Err(ShopError::Conflict(format!(
                "product {} already has a line in order {}",
                item.product_id, item.order_id
            )));
        }
        self.order_items.push(item.clone());
        Ok(())
    }

    fn append_status_history(&mut self, entry: &OrderStatusHistory) -> ShopResult<()> {
        self.status_history.push(entry.clone());
        Ok(())
    }

    fn status_history(&self, order_id: Uuid) -> ShopResult<Vec<OrderStatusHistory>> {
        Ok(self
            .status_history
            .iter()
            .filter(|entry| entry.order_id == order_id)
            .cloned()
            .collect())
    }

    fn product(&self, id: &str) -> ShopResult<Option<Product>> {
        Ok(self.products.get(id).cloned())
    }

    fn upsert_product(&mut self, product: &Product) -> ShopResult<()> {
        self.products.insert(product.id.clone(), product.clone());
        Ok(())
    }

    fn payment(&self, id: Uuid) -> ShopResult<Option<Payment>> {
        Ok(self.payments.iter().find(|p| p.id == id).cloned())
    }

    fn payment_by_external_id(
        &self,
        provider_code: &str,
        external_id: &str,
    ) -> ShopResult<Option<Payment>> {
        Ok(self
            .payments
            .iter()
            .rev()
            .find(|p| {
                p.provider_code == provider_code && p.external_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    fn payments_for_order(&self, order_id: Uuid) -> ShopResult<Vec<Payment>> {
        Ok(self
            .payments
            .iter()
            .rev()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    fn insert_payment(&mut self, payment: &Payment) -> ShopResult<()> {
        if self.payments.iter().any(|p| p.id == payment.id) {
            return Err(ShopError::Conflict(format!("payment {} already exists", payment.id)));
        }
        self.payments.push(payment.clone());
        Ok(())
    }

    fn update_payment(&mut self, payment: &Payment) -> ShopResult<()> {
        let slot = self
            .payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or_else(|| ShopError::PaymentNotFound {
                reference: payment.id.to_string(),
            })?;
        *slot = payment.clone();
        Ok(())
    }

    fn insert_transaction(&mut self, transaction: &Transaction) -> ShopResult<()> {
        self.ledger.rows.push(transaction.clone());
        self.ledger.undo.push(LedgerUndo::Inserted);
        Ok(())
    }

    fn update_transaction(&mut self, transaction: &Transaction) -> ShopResult<()> {
        let index = self
            .ledger
            .rows
            .iter()
            .position(|t| t.id == transaction.id)
            .ok_or_else(|| {
                ShopError::Storage(format!("transaction {} not found", transaction.id))
            })?;
        let previous = std::mem::replace(&mut self.ledger.rows[index], transaction.clone());
        self.ledger.undo.push(LedgerUndo::Updated(index, previous));
        Ok(())
    }

    fn transactions(&self, payment_id: Uuid) -> ShopResult<Vec<Transaction>> {
        Ok(self
            .ledger
            .rows
            .iter()
            .filter(|t| t.payment_id == payment_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use crate::payment::TransactionType;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn mug() -> Product {
        Product::new("mug", "MUG-1", "Mug", dec!(8.00)).with_stock(5)
    }

    fn test_transaction(payment_id: Uuid) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            payment_id,
            kind: TransactionType::Refund,
            external_id: None,
            amount: Some(dec!(4.00)),
            currency: Currency::EUR,
            success: false,
            pending: true,
            error_message: String::new(),
            raw_request: None,
            raw_response: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_failed_unit_rolls_back() {
        let store = MemoryStore::new();
        store.atomic(|tx| tx.upsert_product(&mug())).unwrap();

        let result: ShopResult<()> = store.atomic(|tx| {
            let mut product = tx.require_product("mug")?;
            product.decrement_stock(5);
            tx.upsert_product(&product)?;
            Err(ShopError::Validation("abort".into()))
        });
        assert!(result.is_err());

        let stock = store
            .read(|tx| Ok(tx.require_product("mug")?.stock_quantity))
            .unwrap();
        assert_eq!(stock, 5);
    }

    #[test]
    fn test_failed_unit_restores_ledger() {
        let store = MemoryStore::new();
        let payment_id = Uuid::new_v4();
        let mut first = test_transaction(payment_id);
        store.atomic(|tx| tx.insert_transaction(&first)).unwrap();

        let result: ShopResult<()> = store.atomic(|tx| {
            let mut settled = first.clone();
            settled.pending = false;
            settled.success = true;
            tx.update_transaction(&settled)?;
            tx.insert_transaction(&test_transaction(payment_id))?;
            Err(ShopError::Validation("abort".into()))
        });
        assert!(result.is_err());

        let ledger = store.read(|tx| tx.transactions(payment_id)).unwrap();
        assert_eq!(ledger, vec![first.clone()]);

        first.pending = false;
        store.atomic(|tx| tx.update_transaction(&first)).unwrap();
        let ledger = store.read(|tx| tx.transactions(payment_id)).unwrap();
        assert_eq!(ledger, vec![first]);
    }

    #[test]
    fn test_sequence_starts_after_stored_numbers() {
        let store = MemoryStore::new();
        let first = store
            .atomic(|tx| tx.next_order_sequence("ORD", "202601"))
            .unwrap();
        let second = store
            .atomic(|tx| tx.next_order_sequence("ORD", "202601"))
            .unwrap();
        let other_month = store
            .atomic(|tx| tx.next_order_sequence("ORD", "202602"))
            .unwrap();

        assert_eq!((first, second, other_month), (1, 2, 1));
    }

    #[test]
    fn test_missing_records_are_not_found() {
        let store = MemoryStore::new();
        let err = store.read(|tx| tx.require_order(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, ShopError::OrderNotFound { .. }));

        let err = store.read(|tx| tx.require_product("ghost")).unwrap_err();
        assert!(matches!(err, ShopError::ProductNotFound { .. }));
    }

    #[test]
    fn test_catalog_seeding() {
        let mut catalog = ProductCatalog::new();
        catalog.add(mug());
        let store = MemoryStore::with_catalog(&catalog).unwrap();

        let product = store.read(|tx| tx.require_product("mug")).unwrap();
        assert_eq!(product.stock_quantity, 5);
    }
}
