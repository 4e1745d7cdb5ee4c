//! # Order State Machine
//!
//! The order aggregate, its line-item snapshots and the audit log.
//!
//! ## Lifecycle
//!
//! ```text
//! draft ─submit─▶ pending_payment ─mark_as_paid─▶ paid ─start_processing─▶ processing
//!                                                  │                          │
//!                                                  │ refund                   │ ship
//!                                                  ▼                          ▼
//!                                               refunded      delivered ◀─deliver─ shipped
//!
//! cancel: {draft, pending_payment, paid, processing} ─▶ canceled
//! ```
//!
//! Status is private. Transitions are applied by [`Order::apply`], which is
//! crate-internal: callers go through `OrderService::transition`, which runs
//! the post-transition hooks (status history first) inside the same unit of
//! work.

use crate::address::{Address, CheckoutData};
use crate::error::{ShopError, ShopResult};
use crate::money::Currency;
use crate::product::Product;
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Flat tax rate applied to the subtotal
pub const TAX_RATE: Decimal = dec!(0.21);

/// Subtotal at or above which shipping is free
pub const FREE_SHIPPING_THRESHOLD: Decimal = dec!(50.00);

/// Shipping charged below the threshold
pub const FLAT_SHIPPING: Decimal = dec!(5.95);

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    PendingPayment,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Canceled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Draft,
        OrderStatus::PendingPayment,
        OrderStatus::Paid,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Canceled,
        OrderStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Canceled | OrderStatus::Refunded
        )
    }

    pub fn can_be_canceled(&self) -> bool {
        Transition::Cancel.sources().contains(self)
    }

    pub fn can_be_paid(&self) -> bool {
        *self == OrderStatus::PendingPayment
    }

    /// Stock was decremented on the way into this status
    pub fn holds_stock(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Processing)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Submit,
    MarkAsPaid,
    StartProcessing,
    Ship,
    Deliver,
    Cancel,
    Refund,
}

impl Transition {
    pub const ALL: [Transition; 7] = [
        Transition::Submit,
        Transition::MarkAsPaid,
        Transition::StartProcessing,
        Transition::Ship,
        Transition::Deliver,
        Transition::Cancel,
        Transition::Refund,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Submit => "submit",
            Transition::MarkAsPaid => "mark_as_paid",
            Transition::StartProcessing => "start_processing",
            Transition::Ship => "ship",
            Transition::Deliver => "deliver",
            Transition::Cancel => "cancel",
            Transition::Refund => "refund",
        }
    }

    pub fn sources(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Transition::Submit => &[Draft],
            Transition::MarkAsPaid => &[PendingPayment],
            Transition::StartProcessing => &[Paid],
            Transition::Ship => &[Processing],
            Transition::Deliver => &[Shipped],
            Transition::Cancel => &[Draft, PendingPayment, Paid, Processing],
            Transition::Refund => &[Paid],
        }
    }

    pub fn target(&self) -> OrderStatus {
        match self {
            Transition::Submit => OrderStatus::PendingPayment,
            Transition::MarkAsPaid => OrderStatus::Paid,
            Transition::StartProcessing => OrderStatus::Processing,
            Transition::Ship => OrderStatus::Shipped,
            Transition::Deliver => OrderStatus::Delivered,
            Transition::Cancel => OrderStatus::Canceled,
            Transition::Refund => OrderStatus::Refunded,
        }
    }

    /// Fulfilment transitions that carry no side effects beyond the
    /// timestamp and may be driven directly by back-office callers.
    pub fn is_fulfilment(&self) -> bool {
        matches!(
            self,
            Transition::StartProcessing | Transition::Ship | Transition::Deliver
        )
    }
}

impl FromStr for Transition {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Transition::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| ShopError::Validation(format!("Unknown transition: {}", s)))
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Registered customer reference (identity lives outside this crate)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: Uuid,
    pub email: String,
}

/// The four monetary components plus the derived grand total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub shipping_total: Decimal,
    pub discount_total: Decimal,
    pub grand_total: Decimal,
}

impl OrderTotals {
    /// Flat-rate totals for a set of line items.
    pub fn compute(items: &[OrderItem], discount_total: Decimal, currency: Currency) -> Self {
        let subtotal: Decimal = items.iter().map(|item| item.line_total).sum();
        let tax_total = currency.round(subtotal * TAX_RATE);
        let shipping_total = if subtotal >= FREE_SHIPPING_THRESHOLD {
            Decimal::ZERO
        } else {
            FLAT_SHIPPING
        };
        Self {
            subtotal,
            tax_total,
            shipping_total,
            discount_total,
            grand_total: subtotal + tax_total + shipping_total - discount_total,
        }
    }
}

/// Line-item snapshot; product fields are frozen at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: String,
    pub product_name: String,
    pub product_sku: String,
    pub product_description: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl OrderItem {
    pub fn snapshot(
        order_id: Uuid,
        product: &Product,
        quantity: u32,
        unit_price: Decimal,
    ) -> ShopResult<Self> {
        if quantity < 1 {
            return Err(ShopError::Validation(format!(
                "Quantity for {} must be at least 1",
                product.id
            )));
        }
        if unit_price < dec!(0.01) {
            return Err(ShopError::Validation(format!(
                "Unit price for {} must be at least 0.01",
                product.id
            )));
        }
        let mut item = Self {
            id: Uuid::new_v4(),
            order_id,
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            product_sku: product.sku.clone(),
            product_description: product.description.clone(),
            quantity,
            unit_price,
            line_total: Decimal::ZERO,
        };
        item.recompute();
        Ok(item)
    }

    pub fn recompute(&mut self) {
        self.line_total = self.unit_price * Decimal::from(self.quantity);
    }
}

/// Append-only audit row, one per transition plus one for creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusHistory {
    pub id: Uuid,
    pub order_id: Uuid,
    /// `None` only for the creation row
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub actor: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl OrderStatusHistory {
    pub fn creation(order: &Order, actor: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            from_status: None,
            to_status: order.status(),
            actor: actor.map(str::to_string),
            reason: "Order created".to_string(),
            created_at: order.created_at,
        }
    }

    pub fn for_change(change: &StatusChange, actor: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: change.order_id,
            from_status: Some(change.from),
            to_status: change.to,
            actor: actor.map(str::to_string),
            reason: format!("Status changed via {} transition", change.transition),
            created_at: change.at,
        }
    }
}

/// What a successful transition did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub order_id: Uuid,
    pub transition: Transition,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub at: DateTime<Utc>,
}

/// The order aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,

    /// Human-readable number, e.g. `ORD-202601-0001`
    pub number: String,

    pub user: Option<UserRef>,
    pub guest_email: Option<String>,

    pub billing: Address,
    pub shipping: Address,

    pub currency: Currency,
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub shipping_total: Decimal,
    pub discount_total: Decimal,
    pub grand_total: Decimal,

    pub notes: String,
    pub terms_accepted: bool,
    pub newsletter_signup: bool,

    status: OrderStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Build a draft order from validated checkout data. Exactly one of the
    /// registered user or the guest email must resolve.
    pub fn draft(
        number: String,
        user: Option<UserRef>,
        checkout: &CheckoutData,
        default_country: &str,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> ShopResult<Self> {
        let guest_email = match (&user, checkout.guest_email()) {
            (Some(_), _) => None,
            (None, Some(email)) => Some(email),
            (None, None) => {
                return Err(ShopError::Validation(
                    "Order needs a registered user or a guest email".into(),
                ))
            }
        };

        Ok(Self {
            id: Uuid::new_v4(),
            number,
            user,
            guest_email,
            billing: Address::from_fields(&checkout.billing, default_country),
            shipping: Address::from_fields(&checkout.shipping, default_country),
            currency: checkout.currency.unwrap_or(currency),
            subtotal: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            shipping_total: Decimal::ZERO,
            discount_total: Decimal::ZERO,
            grand_total: Decimal::ZERO,
            notes: checkout.notes.clone(),
            terms_accepted: checkout.terms_accepted,
            newsletter_signup: checkout.newsletter_signup,
            status: OrderStatus::Draft,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
        })
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn totals(&self) -> OrderTotals {
        OrderTotals {
            subtotal: self.subtotal,
            tax_total: self.tax_total,
            shipping_total: self.shipping_total,
            discount_total: self.discount_total,
            grand_total: self.grand_total,
        }
    }

    /// Recompute the monetary components from the given items.
    pub fn calculate_totals(&mut self, items: &[OrderItem]) -> OrderTotals {
        let totals = OrderTotals::compute(items, self.discount_total, self.currency);
        self.subtotal = totals.subtotal;
        self.tax_total = totals.tax_total;
        self.shipping_total = totals.shipping_total;
        self.grand_total = totals.grand_total;
        totals
    }

    pub fn customer_email(&self) -> &str {
        match (&self.user, &self.guest_email) {
            (Some(user), _) => &user.email,
            (None, Some(email)) => email,
            (None, None) => "",
        }
    }

    pub fn customer_name(&self) -> String {
        let name = self.billing.full_name();
        if name.is_empty() {
            self.customer_email().to_string()
        } else {
            name
        }
    }

    pub fn billing_address(&self) -> String {
        self.billing.formatted()
    }

    pub fn shipping_address(&self) -> String {
        self.shipping.formatted()
    }

    pub fn can_be_canceled(&self) -> bool {
        self.status.can_be_canceled()
    }

    pub fn can_be_paid(&self) -> bool {
        self.status.can_be_paid()
    }

    /// Check source status and guard, then move to the target status and
    /// run the transition's own side effect. Nothing changes on error.
    pub(crate) fn apply(
        &mut self,
        transition: Transition,
        items: &[OrderItem],
        now: DateTime<Utc>,
    ) -> ShopResult<StatusChange> {
        let from = self.status;
        if !transition.sources().contains(&from) {
            return Err(ShopError::InvalidTransition {
                order: self.number.clone(),
                transition: transition.name(),
                current: from,
                allowed_from: transition.sources().to_vec(),
            });
        }

        match transition {
            Transition::Submit => {
                if !self.terms_accepted {
                    return Err(self.guard_failed(transition, "terms have not been accepted"));
                }
                if items.is_empty() {
                    return Err(self.guard_failed(transition, "order has no items"));
                }
                self.calculate_totals(items);
            }
            Transition::MarkAsPaid => {
                self.paid_at.get_or_insert(now);
            }
            Transition::Ship => {
                self.shipped_at.get_or_insert(now);
            }
            Transition::Deliver => {
                self.delivered_at.get_or_insert(now);
            }
            Transition::StartProcessing | Transition::Cancel | Transition::Refund => {}
        }

        self.status = transition.target();
        self.updated_at = now;

        Ok(StatusChange {
            order_id: self.id,
            transition,
            from,
            to: self.status,
            at: now,
        })
    }

    fn guard_failed(&self, transition: Transition, reason: &str) -> ShopError {
        ShopError::TransitionGuard {
            order: self.number.clone(),
            transition: transition.name(),
            reason: reason.to_string(),
        }
    }
}

/// `YYYYMM` period an order number is scoped to
pub fn order_period(at: DateTime<Utc>) -> String {
    format!("{:04}{:02}", at.year(), at.month())
}

/// `{prefix}-{YYYYMM}-{seq:04}`
pub fn format_order_number(prefix: &str, period: &str, sequence: u32) -> String {
    format!("{}-{}-{:04}", prefix, period, sequence)
}

/// Sequence part of an order number, if it belongs to `prefix` and `period`
pub fn parse_order_sequence(number: &str, prefix: &str, period: &str) -> Option<u32> {
    number
        .strip_prefix(prefix)?
        .strip_prefix('-')?
        .strip_prefix(period)?
        .strip_prefix('-')?
        .parse()
        .ok()
}
