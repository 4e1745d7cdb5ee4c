//! # Payment Ledger
//!
//! A [`Payment`] is one attempt to collect an order's grand total through a
//! provider; each provider-facing operation under it is a [`Transaction`].
//! Refund totals are derived from the transactions, never stored on the
//! payment.
//!
//! A capture or refund is reserved as a pending transaction before the
//! provider is called and settled afterwards. Pending refunds count against
//! the refundable amount.

use crate::money::Currency;
use crate::order::Order;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Completed,
    Failed,
    Canceled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider_code: String,

    /// Provider's own reference, known after initiation
    pub external_id: Option<String>,

    pub amount: Decimal,
    pub currency: Currency,
    status: PaymentStatus,

    /// Provider-specific diagnostics
    pub raw_request: Option<Value>,
    pub raw_response: Option<Value>,
    pub failure_reason: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// New pending attempt for the order's grand total
    pub fn pending(order: &Order, provider_code: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            provider_code: provider_code.into(),
            external_id: None,
            amount: order.grand_total,
            currency: order.currency,
            status: PaymentStatus::Pending,
            raw_request: None,
            raw_response: None,
            failure_reason: String::new(),
            created_at: now,
            updated_at: now,
            authorized_at: None,
            captured_at: None,
            failed_at: None,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.status, PaymentStatus::Completed | PaymentStatus::Captured)
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, PaymentStatus::Failed | PaymentStatus::Canceled)
    }

    /// Still waiting on the provider (webhook fallback matching)
    pub fn is_open(&self) -> bool {
        matches!(self.status, PaymentStatus::Pending | PaymentStatus::Authorized)
    }

    pub fn can_be_captured(&self) -> bool {
        self.status == PaymentStatus::Authorized
    }

    pub fn can_be_refunded(&self) -> bool {
        self.is_successful()
    }

    /// Sum of successful refund transactions
    pub fn refunded_amount(&self, transactions: &[Transaction]) -> Decimal {
        transactions
            .iter()
            .filter(|t| t.payment_id == self.id)
            .filter(|t| t.kind == TransactionType::Refund && t.success)
            .filter_map(|t| t.amount)
            .sum()
    }

    /// Sum of refunds still waiting on the provider
    pub fn reserved_refund_amount(&self, transactions: &[Transaction]) -> Decimal {
        transactions
            .iter()
            .filter(|t| t.payment_id == self.id)
            .filter(|t| t.kind == TransactionType::Refund && t.pending)
            .filter_map(|t| t.amount)
            .sum()
    }

    /// Amount still refundable; zero when the payment is not refundable
    pub fn refundable_amount(&self, transactions: &[Transaction]) -> Decimal {
        if !self.can_be_refunded() {
            return Decimal::ZERO;
        }
        let claimed =
            self.refunded_amount(transactions) + self.reserved_refund_amount(transactions);
        (self.amount - claimed).max(Decimal::ZERO)
    }

    /// An operation of this kind is in flight
    pub fn has_pending(&self, kind: TransactionType, transactions: &[Transaction]) -> bool {
        transactions
            .iter()
            .any(|t| t.payment_id == self.id && t.kind == kind && t.pending)
    }

    pub fn set_external_id(&mut self, external_id: Option<String>) {
        if let Some(id) = external_id.filter(|id| !id.is_empty()) {
            self.external_id = Some(id);
        }
    }

    pub fn mark_as_authorized(&mut self, external_id: Option<String>, raw: Option<Value>) {
        let now = self.touch(PaymentStatus::Authorized, external_id, raw);
        self.authorized_at = Some(now);
    }

    pub fn mark_as_captured(&mut self, external_id: Option<String>, raw: Option<Value>) {
        let now = self.touch(PaymentStatus::Captured, external_id, raw);
        self.captured_at = Some(now);
    }

    pub fn mark_as_completed(&mut self, external_id: Option<String>, raw: Option<Value>) {
        let now = self.touch(PaymentStatus::Completed, external_id, raw);
        self.captured_at = Some(now);
    }

    pub fn mark_as_failed(&mut self, reason: impl Into<String>, raw: Option<Value>) {
        let now = self.touch(PaymentStatus::Failed, None, raw);
        self.failed_at = Some(now);
        self.failure_reason = reason.into();
    }

    pub fn mark_as_canceled(&mut self, raw: Option<Value>) {
        self.touch(PaymentStatus::Canceled, None, raw);
    }

    pub fn mark_as_refunded(&mut self) {
        self.touch(PaymentStatus::Refunded, None, None);
    }

    pub fn mark_as_partially_refunded(&mut self) {
        self.touch(PaymentStatus::PartiallyRefunded, None, None);
    }

    fn touch(
        &mut self,
        status: PaymentStatus,
        external_id: Option<String>,
        raw: Option<Value>,
    ) -> DateTime<Utc> {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.set_external_id(external_id);
        if raw.is_some() {
            self.raw_response = raw;
        }
        now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Authorize,
    Capture,
    Sale,
    Refund,
    Void,
    Webhook,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Authorize => "authorize",
            TransactionType::Capture => "capture",
            TransactionType::Sale => "sale",
            TransactionType::Refund => "refund",
            TransactionType::Void => "void",
            TransactionType::Webhook => "webhook",
        }
    }
}

/// Record of one provider-facing operation. Settled rows never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub external_id: Option<String>,
    /// Webhook pings may carry no amount
    pub amount: Option<Decimal>,
    pub currency: Currency,
    pub success: bool,
    /// Reserved, provider call in flight
    #[serde(default)]
    pub pending: bool,
    pub error_message: String,
    pub raw_request: Option<Value>,
    pub raw_response: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(payment: &Payment, kind: TransactionType, success: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            kind,
            external_id: None,
            amount: None,
            currency: payment.currency,
            success,
            pending: false,
            error_message: String::new(),
            raw_request: None,
            raw_response: None,
            created_at: Utc::now(),
        }
    }

    /// Pending capture/refund holding its place in the ledger
    pub fn reservation(payment: &Payment, kind: TransactionType, amount: Option<Decimal>) -> Self {
        let mut reserved = Self::new(payment, kind, false).with_amount(amount);
        reserved.pending = true;
        reserved
    }

    pub fn with_amount(mut self, amount: Option<Decimal>) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id.filter(|id| !id.is_empty());
        self
    }

    pub fn with_error(mut self, message: Option<String>) -> Self {
        self.error_message = message.unwrap_or_default();
        self
    }

    pub fn with_request(mut self, raw: Option<Value>) -> Self {
        self.raw_request = raw;
        self
    }

    pub fn with_response(mut self, raw: Option<Value>) -> Self {
        self.raw_response = raw;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CheckoutData;
    use rust_decimal_macros::dec;

    fn payment(amount: Decimal) -> Payment {
        let checkout = CheckoutData {
            guest_email: Some("guest@example.com".into()),
            ..Default::default()
        };
        let mut order =
            Order::draft("ORD-1".into(), None, &checkout, "ES", Currency::EUR, Utc::now())
                .unwrap();
        order.grand_total = amount;
        Payment::pending(&order, "dummy")
    }

    fn refund(payment: &Payment, amount: Decimal, success: bool) -> Transaction {
        Transaction::new(payment, TransactionType::Refund, success).with_amount(Some(amount))
    }

    #[test]
    fn test_refund_amounts_are_derived() {
        let mut p = payment(dec!(36.20));
        p.mark_as_completed(Some("ext_1".into()), None);

        let ledger = vec![
            refund(&p, dec!(10.00), true),
            refund(&p, dec!(5.00), false),
            Transaction::new(&p, TransactionType::Webhook, true),
        ];

        assert_eq!(p.refunded_amount(&ledger), dec!(10.00));
        assert_eq!(p.refundable_amount(&ledger), dec!(26.20));
    }

    #[test]
    fn test_pending_refunds_are_reserved() {
        let mut p = payment(dec!(30.15));
        p.mark_as_completed(Some("ext_2".into()), None);

        let mut ledger = vec![Transaction::reservation(
            &p,
            TransactionType::Refund,
            Some(dec!(30.15)),
        )];
        assert_eq!(p.refunded_amount(&ledger), Decimal::ZERO);
        assert_eq!(p.refundable_amount(&ledger), Decimal::ZERO);
        assert!(p.has_pending(TransactionType::Refund, &ledger));
        assert!(!p.has_pending(TransactionType::Capture, &ledger));

        // provider declined: the reservation is released
        ledger[0].pending = false;
        assert_eq!(p.refundable_amount(&ledger), dec!(30.15));
    }

    #[test]
    fn test_refundable_is_zero_unless_successful() {
        let p = payment(dec!(20.00));
        assert!(p.is_pending());
        assert_eq!(p.refundable_amount(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_mark_methods_stamp_timestamps() {
        let mut p = payment(dec!(20.00));
        p.mark_as_authorized(Some("ext_9".into()), None);
        assert!(p.can_be_captured());
        assert!(p.authorized_at.is_some());
        assert_eq!(p.external_id.as_deref(), Some("ext_9"));

        p.mark_as_captured(None, None);
        assert!(p.is_successful());
        assert!(p.captured_at.is_some());
        // absent external id keeps the known one
        assert_eq!(p.external_id.as_deref(), Some("ext_9"));

        p.mark_as_failed("card declined", None);
        assert!(p.is_failed());
        assert_eq!(p.failure_reason, "card declined");
        assert!(p.failed_at.is_some());
    }
}
