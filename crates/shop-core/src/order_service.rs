//! # Order Service
//!
//! Cart → order conversion, lifecycle transitions and the stock side
//! effects that accompany them. Every operation is one unit of work on the
//! store, re-reading the order before acting.
//!
//! Transitions run through [`OrderService::apply_transition`], which saves
//! the order and then runs the post-transition hooks in registration order.
//! The first hook is always [`StatusHistoryHook`].

use crate::address::CheckoutData;
use crate::cart::CartView;
use crate::config::OrderSettings;
use crate::error::{ShopError, ShopResult};
use crate::order::{
    format_order_number, order_period, Order, OrderItem, OrderStatus, OrderStatusHistory,
    OrderTotals, StatusChange, Transition, UserRef,
};
use crate::store::{Store, Tx};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Attempts at inserting an order before giving up on number conflicts
const ORDER_INSERT_ATTEMPTS: usize = 3;

/// Numbers tried per attempt when skipping ones already taken
const ORDER_NUMBER_PROBES: usize = 16;

/// Side effect run after every successful transition, inside the same unit
/// of work. An error rolls the transition back.
pub trait TransitionHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn after_transition(
        &self,
        tx: &mut dyn Tx,
        order: &Order,
        change: &StatusChange,
        actor: Option<&str>,
    ) -> ShopResult<()>;
}

/// Appends one `OrderStatusHistory` row per transition
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusHistoryHook;

impl TransitionHook for StatusHistoryHook {
    fn name(&self) -> &'static str {
        "status_history"
    }

    fn after_transition(
        &self,
        tx: &mut dyn Tx,
        _order: &Order,
        change: &StatusChange,
        actor: Option<&str>,
    ) -> ShopResult<()> {
        tx.append_status_history(&OrderStatusHistory::for_change(change, actor))
    }
}

/// Order with everything a confirmation page needs
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order: Order,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub total_items: u32,
    pub can_be_canceled: bool,
    pub can_be_paid: bool,
}

pub struct OrderService<S: Store> {
    store: Arc<S>,
    settings: OrderSettings,
    hooks: Vec<Arc<dyn TransitionHook>>,
}

impl<S: Store> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            settings: self.settings.clone(),
            hooks: self.hooks.clone(),
        }
    }
}

impl<S: Store> OrderService<S> {
    pub fn new(store: Arc<S>, settings: OrderSettings) -> Self {
        Self {
            store,
            settings,
            hooks: vec![Arc::new(StatusHistoryHook)],
        }
    }

    /// Builder: append a post-transition hook (runs after status history)
    pub fn with_hook(mut self, hook: Arc<dyn TransitionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &OrderSettings {
        &self.settings
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Re-check the required billing/shipping keys, reporting all missing
    /// ones at once.
    pub fn validate_checkout(&self, checkout: &CheckoutData) -> ShopResult<()> {
        checkout.validate()
    }

    /// Convert a cart into a persisted `draft` order. The cart itself is not
    /// touched.
    #[instrument(skip_all, fields(lines = cart.lines().len()))]
    pub fn create_order_from_cart(
        &self,
        cart: &dyn CartView,
        user: Option<UserRef>,
        checkout: &CheckoutData,
    ) -> ShopResult<Order> {
        self.create(cart, user, checkout, false)
    }

    /// Validate, create from the cart and submit for payment as one unit.
    /// The caller clears the cart once this returns `Ok`.
    #[instrument(skip_all, fields(lines = cart.lines().len()))]
    pub fn place_order(
        &self,
        cart: &dyn CartView,
        user: Option<UserRef>,
        checkout: &CheckoutData,
    ) -> ShopResult<Order> {
        self.create(cart, user, checkout, true)
    }

    fn create(
        &self,
        cart: &dyn CartView,
        user: Option<UserRef>,
        checkout: &CheckoutData,
        submit: bool,
    ) -> ShopResult<Order> {
        checkout.validate()?;
        let lines = cart.lines();
        if lines.is_empty() {
            return Err(ShopError::EmptyCart);
        }
        let mut seen = HashSet::new();
        if let Some(dup) = lines.iter().find(|line| !seen.insert(line.product_id.as_str())) {
            return Err(ShopError::Validation(format!(
                "Product {} appears on more than one cart line",
                dup.product_id
            )));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.store.atomic(|tx| {
                let now = Utc::now();
                let number = self.allocate_number(tx, now)?;
                let mut order = Order::draft(
                    number,
                    user.clone(),
                    checkout,
                    &self.settings.default_country,
                    self.settings.currency,
                    now,
                )?;

                let mut items = Vec::with_capacity(lines.len());
                for line in &lines {
                    let product = tx.require_product(&line.product_id)?;
                    items.push(OrderItem::snapshot(
                        order.id,
                        &product,
                        line.quantity,
                        line.unit_price,
                    )?);
                }
                order.calculate_totals(&items);

                tx.insert_order(&order)?;
                for item in &items {
                    tx.insert_order_item(item)?;
                }
                tx.append_status_history(&OrderStatusHistory::creation(&order, None))?;

                if submit {
                    self.apply_transition(tx, &mut order, Transition::Submit, None)?;
                }
                Ok(order)
            });

            match result {
                Err(ShopError::Conflict(reason)) if attempt < ORDER_INSERT_ATTEMPTS => {
                    warn!(attempt, %reason, "Order insert conflicted, retrying");
                }
                Ok(order) => {
                    info!(
                        order = %order.number,
                        status = %order.status(),
                        grand_total = %order.grand_total,
                        "Order created"
                    );
                    return Ok(order);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Next free `{prefix}-{YYYYMM}-{seq}` number. The store serializes units
    /// of work, so the counter read and the insert cannot interleave with
    /// another creation.
    fn allocate_number(&self, tx: &mut dyn Tx, now: DateTime<Utc>) -> ShopResult<String> {
        let prefix = &self.settings.number_prefix;
        let period = order_period(now);
        for _ in 0..ORDER_NUMBER_PROBES {
            let sequence = tx.next_order_sequence(prefix, &period)?;
            let number = format_order_number(prefix, &period, sequence);
            if tx.order_by_number(&number)?.is_none() {
                return Ok(number);
            }
        }
        Err(ShopError::Conflict(format!(
            "no free order number in {}-{}",
            prefix, period
        )))
    }

    /// Apply `transition` to `order` inside an open unit of work: guard,
    /// save, then run every hook.
    pub fn apply_transition(
        &self,
        tx: &mut dyn Tx,
        order: &mut Order,
        transition: Transition,
        actor: Option<&str>,
    ) -> ShopResult<StatusChange> {
        let items = if transition == Transition::Submit {
            tx.order_items(order.id)?
        } else {
            Vec::new()
        };

        let change = order.apply(transition, &items, Utc::now()).map_err(|e| {
            warn!(order = %order.number, %transition, error = %e, "Transition rejected");
            e
        })?;
        tx.update_order(order)?;

        for hook in &self.hooks {
            hook.after_transition(tx, order, &change, actor)?;
        }

        info!(
            order = %order.number,
            from = %change.from,
            to = %change.to,
            "Order status changed via {} transition",
            transition
        );
        Ok(change)
    }

    /// Run a single transition as its own unit of work.
    #[instrument(skip(self))]
    pub fn transition(
        &self,
        order_id: Uuid,
        transition: Transition,
        actor: Option<&str>,
    ) -> ShopResult<Order> {
        if transition == Transition::Cancel {
            return self.cancel_order(order_id, actor);
        }
        self.store.atomic(|tx| {
            let mut order = tx.require_order(order_id)?;
            if transition != Transition::MarkAsPaid {
                self.apply_transition(tx, &mut order, transition, actor)?;
            } else if !self.settle_in(tx, &mut order, actor)? {
                return Err(ShopError::InvalidTransition {
                    order: order.number.clone(),
                    transition: transition.name(),
                    current: order.status(),
                    allowed_from: transition.sources().to_vec(),
                });
            }
            Ok(order)
        })
    }

    pub fn submit_order(&self, order_id: Uuid, actor: Option<&str>) -> ShopResult<Order> {
        self.transition(order_id, Transition::Submit, actor)
    }

    /// Mark a `pending_payment` order paid and decrement tracked stock.
    /// Returns `false` (and changes nothing) for any other status.
    #[instrument(skip(self))]
    pub fn process_payment_success(&self, order_id: Uuid) -> ShopResult<bool> {
        self.store.atomic(|tx| {
            let mut order = tx.require_order(order_id)?;
            self.settle_in(tx, &mut order, None)
        })
    }

    /// Payment-success body for callers that already hold a unit of work.
    pub fn settle_in(
        &self,
        tx: &mut dyn Tx,
        order: &mut Order,
        actor: Option<&str>,
    ) -> ShopResult<bool> {
        if order.status() != OrderStatus::PendingPayment {
            warn!(
                order = %order.number,
                status = %order.status(),
                "Payment success ignored: order is not pending payment"
            );
            return Ok(false);
        }

        self.apply_transition(tx, order, Transition::MarkAsPaid, actor)?;

        for item in tx.order_items(order.id)? {
            let Some(mut product) = tx.product(&item.product_id)? else {
                warn!(product = %item.product_id, "Product record missing, stock not adjusted");
                continue;
            };
            if !product.track_inventory {
                continue;
            }
            if product.decrement_stock(item.quantity) {
                tx.upsert_product(&product)?;
            } else {
                warn!(
                    order = %order.number,
                    product = %product.id,
                    requested = item.quantity,
                    available = product.stock_quantity,
                    "Insufficient stock at payment time, decrement skipped"
                );
            }
        }
        Ok(true)
    }

    /// Cancel an order, restoring stock first when it had been paid.
    #[instrument(skip(self))]
    pub fn cancel_order(&self, order_id: Uuid, actor: Option<&str>) -> ShopResult<Order> {
        self.store.atomic(|tx| {
            let mut order = tx.require_order(order_id)?;

            if order.status().holds_stock() {
                for item in tx.order_items(order.id)? {
                    if let Some(mut product) = tx.product(&item.product_id)? {
                        if product.restore_stock(item.quantity) {
                            tx.upsert_product(&product)?;
                        }
                    }
                }
            }

            self.apply_transition(tx, &mut order, Transition::Cancel, actor)?;
            Ok(order)
        })
    }

    pub fn get_order(&self, order_id: Uuid) -> ShopResult<Order> {
        self.store.read(|tx| tx.require_order(order_id))
    }

    pub fn get_order_by_number(&self, number: &str) -> ShopResult<Order> {
        self.store.read(|tx| tx.require_order_by_number(number))
    }

    pub fn order_items(&self, order_id: Uuid) -> ShopResult<Vec<OrderItem>> {
        self.store.read(|tx| tx.order_items(order_id))
    }

    pub fn status_history(&self, order_id: Uuid) -> ShopResult<Vec<OrderStatusHistory>> {
        self.store.read(|tx| tx.status_history(order_id))
    }

    pub fn order_summary(&self, number: &str) -> ShopResult<OrderSummary> {
        self.store.read(|tx| {
            let order = tx.require_order_by_number(number)?;
            let items = tx.order_items(order.id)?;
            Ok(OrderSummary {
                status: order.status(),
                totals: order.totals(),
                total_items: items
                    .iter()
                    .fold(0u32, |n, item| n.saturating_add(item.quantity)),
                can_be_canceled: order.can_be_canceled(),
                can_be_paid: order.can_be_paid(),
                items,
                order,
            })
        })
    }
}
