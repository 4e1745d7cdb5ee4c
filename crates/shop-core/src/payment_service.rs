//! # Payment Service
//!
//! Coordinates orders, the payment ledger and providers.
//!
//! ## Flow
//!
//! ```text
//! initiate_payment ─▶ [unit 1] guard + insert pending Payment
//!                  ─▶ provider.start_payment (bounded by timeout)
//!                  ─▶ [unit 2] authorize Transaction + external id / failure
//!
//! process_webhook  ─▶ signature check ─▶ provider.handle_webhook
//!                  ─▶ [unit] match Payment, webhook Transaction, status mapping,
//!                           order settlement + stock
//! ```
//!
//! Provider calls never run inside a unit of work. Guard and validation
//! failures are returned before anything is written; provider failures are
//! recorded as failed transactions and returned as unsuccessful outcomes.

use crate::config::PaymentSettings;
use crate::error::{ErrorKind, ShopError, ShopResult};
use crate::order::{Order, OrderStatus, Transition};
use crate::order_service::OrderService;
use crate::payment::{Payment, PaymentStatus, Transaction, TransactionType};
use crate::provider::{
    BoxedPaymentProvider, InitResult, OperationResult, PaymentMethod, ProviderOptions,
    WebhookRequest, WebhookResult, WebhookStatus,
};
use crate::registry::ProviderRegistry;
use crate::store::{Store, Tx};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Result of `initiate_payment`
#[derive(Debug, Clone, Serialize)]
pub struct PaymentInitiation {
    pub success: bool,
    pub payment_id: Uuid,
    pub external_id: Option<String>,
    pub redirect_url: Option<String>,
    pub form_data: Option<Value>,
    pub render_data: Option<Value>,
    pub error: Option<String>,
}

/// Result of `process_webhook`; never an error
#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub success: bool,
    pub payment_id: Option<Uuid>,
    /// Status reported by the provider
    pub status: Option<WebhookStatus>,
    /// Local payment status after processing
    pub payment_status: Option<PaymentStatus>,
    pub error: Option<String>,
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
    /// HTTP status the failure maps to (200 on success)
    #[serde(skip)]
    pub status_code: u16,
}

impl WebhookOutcome {
    fn processed(payment: &Payment, status: WebhookStatus) -> Self {
        Self {
            success: true,
            payment_id: Some(payment.id),
            status: Some(status),
            payment_status: Some(payment.status()),
            error: None,
            error_kind: None,
            status_code: 200,
        }
    }

    fn failed(err: &ShopError) -> Self {
        Self {
            success: false,
            payment_id: None,
            status: None,
            payment_status: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            status_code: err.status_code(),
        }
    }
}

/// Result of capture / refund
#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub payment_id: Uuid,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub error: Option<String>,
}

pub struct PaymentService<S: Store> {
    orders: OrderService<S>,
    registry: Arc<ProviderRegistry>,
    timeout: Duration,
}

impl<S: Store> Clone for PaymentService<S> {
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            registry: self.registry.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: Store> PaymentService<S> {
    pub fn new(
        orders: OrderService<S>,
        registry: Arc<ProviderRegistry>,
        settings: &PaymentSettings,
    ) -> Self {
        Self {
            orders,
            registry,
            timeout: settings.provider_timeout(),
        }
    }

    /// Builder: override the provider call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    fn store(&self) -> &S {
        self.orders.store()
    }

    pub fn available_payment_methods(&self) -> Vec<PaymentMethod> {
        self.registry.payment_methods()
    }

    pub fn get_payment(&self, payment_id: Uuid) -> ShopResult<Payment> {
        self.store().read(|tx| tx.require_payment(payment_id))
    }

    /// Newest first
    pub fn payments_for_order(&self, order_id: Uuid) -> ShopResult<Vec<Payment>> {
        self.store().read(|tx| tx.payments_for_order(order_id))
    }

    pub fn transactions(&self, payment_id: Uuid) -> ShopResult<Vec<Transaction>> {
        self.store().read(|tx| tx.transactions(payment_id))
    }

    pub fn refundable_amount(&self, payment_id: Uuid) -> ShopResult<Decimal> {
        self.store().read(|tx| {
            let payment = tx.require_payment(payment_id)?;
            Ok(payment.refundable_amount(&tx.transactions(payment_id)?))
        })
    }

    async fn bounded<T, F>(&self, provider: &str, call: F) -> ShopResult<T>
    where
        F: Future<Output = ShopResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ShopError::ProviderTimeout {
                provider: provider.to_string(),
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Start a payment attempt for a `pending_payment` order.
    ///
    /// The pending `Payment` is committed before the provider is called; the
    /// provider's answer is recorded in a second unit of work. A provider
    /// failure comes back as `Ok` with `success == false`.
    #[instrument(skip(self, options), fields(order = %order_id))]
    pub async fn initiate_payment(
        &self,
        order_id: Uuid,
        provider_code: &str,
        return_url: &str,
        notify_url: &str,
        options: ProviderOptions,
    ) -> ShopResult<PaymentInitiation> {
        let order = self.store().read(|tx| tx.require_order(order_id))?;
        ensure_payable(&order)?;
        let provider = self.registry.get(provider_code)?;

        let (order, payment) = self.store().atomic(|tx| {
            let order = tx.require_order(order_id)?;
            ensure_payable(&order)?;
            let payment = Payment::pending(&order, provider.code());
            tx.insert_payment(&payment)?;
            Ok((order, payment))
        })?;
        info!(order = %order.number, payment = %payment.id, provider = provider_code, "Payment created");

        let result = match self
            .bounded(
                provider_code,
                provider.start_payment(&order, return_url, notify_url, &options),
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(order = %order.number, error = %e, "Payment initiation failed at provider");
                InitResult::failure(e.to_string())
            }
        };

        let request = json!({
            "return_url": return_url,
            "notify_url": notify_url,
            "options": options,
        });
        let response = serde_json::to_value(&result).ok();

        let payment = self.store().atomic(|tx| {
            let mut payment = tx.require_payment(payment.id)?;
            let record = Transaction::new(&payment, TransactionType::Authorize, result.success)
                .with_amount(Some(payment.amount))
                .with_external_id(result.external_id.clone())
                .with_error(result.error_message.clone())
                .with_request(Some(request.clone()))
                .with_response(response.clone());
            tx.insert_transaction(&record)?;

            payment.raw_request = Some(request.clone());
            if result.success {
                payment.set_external_id(result.external_id.clone());
                payment.raw_response = response.clone();
                payment.updated_at = Utc::now();
            } else if payment.is_open() {
                let reason = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                payment.mark_as_failed(reason, response.clone());
            }
            tx.update_payment(&payment)?;
            Ok(payment)
        })?;

        if result.success {
            info!(payment = %payment.id, external_id = ?payment.external_id, "Payment started");
        }

        Ok(PaymentInitiation {
            success: result.success,
            payment_id: payment.id,
            external_id: payment.external_id.clone(),
            redirect_url: result.redirect_url,
            form_data: result.form_data,
            render_data: result.render_data,
            error: result.error_message,
        })
    }

    /// Apply an inbound provider notification. Never fails: errors come back
    /// as an unsuccessful outcome carrying the error's kind and status code.
    #[instrument(skip(self, request), fields(provider = %provider_code, method = %request.method))]
    pub async fn process_webhook(
        &self,
        provider_code: &str,
        request: &WebhookRequest,
    ) -> WebhookOutcome {
        match self.try_process_webhook(provider_code, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                match e.kind() {
                    ErrorKind::Internal => error!(error = %e, "Webhook processing error"),
                    _ => warn!(error = %e, "Webhook rejected"),
                }
                WebhookOutcome::failed(&e)
            }
        }
    }

    async fn try_process_webhook(
        &self,
        provider_code: &str,
        request: &WebhookRequest,
    ) -> ShopResult<WebhookOutcome> {
        let provider = self.registry.get(provider_code)?;
        if !provider.capabilities().supports_webhooks {
            return Err(unsupported(&provider, "webhook"));
        }

        if !provider.validate_webhook_signature(request) {
            return Err(ShopError::WebhookVerificationFailed(format!(
                "invalid signature for provider {}",
                provider_code
            )));
        }

        let result = self
            .bounded(provider_code, provider.handle_webhook(request))
            .await?;
        if !result.success {
            return Err(ShopError::Provider {
                provider: provider_code.to_string(),
                message: result
                    .error_message
                    .unwrap_or_else(|| "webhook not processed".to_string()),
            });
        }

        let raw_request = request.to_raw();
        self.store().atomic(|tx| {
            let mut payment = match_payment(tx, provider_code, &result)?;

            let record = Transaction::new(&payment, TransactionType::Webhook, true)
                .with_amount(result.amount)
                .with_external_id(result.transaction_id.clone())
                .with_request(Some(raw_request.clone()))
                .with_response(result.raw_data.clone());
            tx.insert_transaction(&record)?;

            self.apply_webhook_status(tx, &mut payment, &result)?;
            Ok(WebhookOutcome::processed(&payment, result.status))
        })
    }

    /// Status mapping. Every branch checks the current payment/order status
    /// first, so a replayed notification changes nothing.
    fn apply_webhook_status(
        &self,
        tx: &mut dyn Tx,
        payment: &mut Payment,
        result: &WebhookResult,
    ) -> ShopResult<()> {
        let external_id = result.payment_id.clone();
        let raw = result.raw_data.clone();

        match result.status {
            WebhookStatus::Completed => {
                let settled = payment.is_successful()
                    || matches!(
                        payment.status(),
                        PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded
                    );
                if !settled {
                    payment.mark_as_completed(external_id, raw);
                    tx.update_payment(payment)?;
                    info!(payment = %payment.id, "Payment completed");
                }

                let mut order = tx.require_order(payment.order_id)?;
                match order.status() {
                    OrderStatus::PendingPayment => {
                        self.orders.settle_in(tx, &mut order, None)?;
                    }
                    OrderStatus::Canceled => {
                        warn!(
                            order = %order.number,
                            payment = %payment.id,
                            "Payment completed for a canceled order"
                        );
                    }
                    status if !settled => {
                        warn!(
                            order = %order.number,
                            payment = %payment.id,
                            %status,
                            "Payment completed for an order already settled, possible double charge"
                        );
                    }
                    _ => {}
                }
            }
            WebhookStatus::Failed => {
                if payment.is_open() {
                    let reason = result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Payment failed".to_string());
                    payment.mark_as_failed(reason, raw);
                    tx.update_payment(payment)?;
                    info!(payment = %payment.id, "Payment failed");
                }
            }
            WebhookStatus::Authorized => {
                if payment.is_pending() {
                    payment.mark_as_authorized(external_id, raw);
                    tx.update_payment(payment)?;
                    info!(payment = %payment.id, "Payment authorized");
                }
            }
            WebhookStatus::Pending | WebhookStatus::Canceled => {}
        }
        Ok(())
    }

    /// Settle an authorized hold. A successful capture also settles an order
    /// still awaiting payment.
    ///
    /// The capture is reserved in the ledger before the provider call, so of
    /// two concurrent captures only one reaches the provider.
    #[instrument(skip(self, options))]
    pub async fn capture_payment(
        &self,
        payment_id: Uuid,
        amount: Option<Decimal>,
        options: ProviderOptions,
    ) -> ShopResult<OperationOutcome> {
        let (order, payment) = self.load(payment_id)?;
        check_capture(&payment, amount, false)?;
        let provider = self.registry.get(&payment.provider_code)?;
        let capture = provider
            .as_capture()
            .ok_or_else(|| unsupported(&provider, "capture"))?;

        // re-checked under the store lock; a pending capture means another
        // caller got there first
        let (payment, reservation) = self.store().atomic(|tx| {
            let payment = tx.require_payment(payment_id)?;
            let ledger = tx.transactions(payment_id)?;
            let in_flight = payment.has_pending(TransactionType::Capture, &ledger);
            check_capture(&payment, amount, in_flight)?;
            let reservation = Transaction::reservation(&payment, TransactionType::Capture, amount);
            tx.insert_transaction(&reservation)?;
            Ok((payment, reservation))
        })?;

        let result = self
            .bounded(
                provider.code(),
                capture.capture(&order, &payment, amount, &options),
            )
            .await
            .unwrap_or_else(|e| failed_operation(&payment, "capture", e));

        let captured = result.amount.or(amount);
        self.store().atomic(|tx| {
            let mut payment = tx.require_payment(payment_id)?;
            settle_reservation(tx, reservation, &result, captured)?;

            if result.success {
                if payment.can_be_captured() {
                    if let Some(value) = captured.filter(|v| *v < payment.amount) {
                        payment.amount = value;
                    }
                    payment.mark_as_captured(None, result.raw_response.clone());
                    tx.update_payment(&payment)?;
                    info!(payment = %payment.id, "Payment captured");

                    let mut order = tx.require_order(payment.order_id)?;
                    if order.status() == OrderStatus::PendingPayment {
                        self.orders.settle_in(tx, &mut order, None)?;
                    }
                } else {
                    warn!(
                        payment = %payment.id,
                        status = %payment.status(),
                        "Capture confirmed after the payment left authorized"
                    );
                }
            }
            Ok(outcome(&payment, &result, captured))
        })
    }

    /// Refund all or part of a settled payment. `amount` defaults to the
    /// refundable remainder.
    ///
    /// A rejected amount returns `InvalidRefundAmount` and records nothing.
    /// A provider failure records a failed refund transaction. The amount is
    /// reserved before the provider call, so concurrent refunds can never
    /// exceed what was paid.
    #[instrument(skip(self, options))]
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        amount: Option<Decimal>,
        reason: &str,
        options: ProviderOptions,
    ) -> ShopResult<OperationOutcome> {
        let (order, payment) = self.store().read(|tx| {
            let payment = tx.require_payment(payment_id)?;
            check_refund(&payment, amount, &tx.transactions(payment_id)?)?;
            Ok((tx.require_order(payment.order_id)?, payment))
        })?;
        let provider = self.registry.get(&payment.provider_code)?;
        let refund = provider
            .as_refund()
            .ok_or_else(|| unsupported(&provider, "refund"))?;

        // re-checked under the store lock, counting refunds still in flight
        let (payment, requested, reservation) = self.store().atomic(|tx| {
            let payment = tx.require_payment(payment_id)?;
            let (requested, refundable) =
                check_refund(&payment, amount, &tx.transactions(payment_id)?)?;
            if requested < refundable && !refund.supports_partial_refund() {
                return Err(unsupported(&provider, "partial refund"));
            }
            let reservation =
                Transaction::reservation(&payment, TransactionType::Refund, Some(requested));
            tx.insert_transaction(&reservation)?;
            Ok((payment, requested, reservation))
        })?;

        let result = self
            .bounded(
                provider.code(),
                refund.refund(&order, &payment, Some(requested), reason, &options),
            )
            .await
            .unwrap_or_else(|e| failed_operation(&payment, "refund", e));

        // never more than was reserved
        let refunded = Some(result.amount.map_or(requested, |v| v.min(requested)));
        self.store().atomic(|tx| {
            let mut payment = tx.require_payment(payment_id)?;
            settle_reservation(tx, reservation, &result, refunded)?;

            if result.success {
                let ledger = tx.transactions(payment_id)?;
                let total_refunded = payment.refunded_amount(&ledger);
                if total_refunded >= payment.amount {
                    payment.mark_as_refunded();
                    tx.update_payment(&payment)?;
                    info!(payment = %payment.id, amount = %total_refunded, "Payment refunded");

                    let mut order = tx.require_order(payment.order_id)?;
                    if order.status() == OrderStatus::Paid {
                        self.orders
                            .apply_transition(tx, &mut order, Transition::Refund, None)?;
                    } else {
                        warn!(
                            order = %order.number,
                            status = %order.status(),
                            "Payment fully refunded but order cannot transition to refunded"
                        );
                    }
                } else if payment.status() != PaymentStatus::Refunded {
                    payment.mark_as_partially_refunded();
                    tx.update_payment(&payment)?;
                    info!(payment = %payment.id, amount = %total_refunded, "Payment partially refunded");
                }
            }
            Ok(outcome(&payment, &result, refunded))
        })
    }

    /// Ask the provider for the current external state. Local records are
    /// not changed.
    #[instrument(skip(self))]
    pub async fn payment_status(&self, payment_id: Uuid) -> ShopResult<WebhookResult> {
        let payment = self.get_payment(payment_id)?;
        let external_id = payment.external_id.clone().ok_or_else(|| {
            ShopError::Validation(format!("Payment {} has no provider reference yet", payment_id))
        })?;
        let provider = self.registry.get(&payment.provider_code)?;
        self.bounded(provider.code(), provider.get_payment_status(&external_id))
            .await
    }

    fn load(&self, payment_id: Uuid) -> ShopResult<(Order, Payment)> {
        self.store().read(|tx| {
            let payment = tx.require_payment(payment_id)?;
            let order = tx.require_order(payment.order_id)?;
            Ok((order, payment))
        })
    }
}

fn ensure_payable(order: &Order) -> ShopResult<()> {
    if order.can_be_paid() {
        Ok(())
    } else {
        Err(ShopError::OrderNotPayable {
            order: order.number.clone(),
            status: order.status(),
        })
    }
}

fn unsupported(provider: &BoxedPaymentProvider, operation: &'static str) -> ShopError {
    ShopError::UnsupportedOperation {
        provider: provider.code().to_string(),
        operation,
    }
}

fn failed_operation(payment: &Payment, operation: &str, err: ShopError) -> OperationResult {
    warn!(payment = %payment.id, operation, error = %err, "Provider operation failed");
    OperationResult::failure(err.to_string())
}

/// Webhook → payment: provider reference first, then the most recent open
/// payment of the same order and provider.
fn match_payment(tx: &dyn Tx, provider_code: &str, result: &WebhookResult) -> ShopResult<Payment> {
    if let Some(external_id) = result.payment_id.as_deref() {
        if let Some(payment) = tx.payment_by_external_id(provider_code, external_id)? {
            return Ok(payment);
        }
    }

    if let Some(order_id) = result.order_id {
        let open = tx
            .payments_for_order(order_id)?
            .into_iter()
            .find(|p| p.provider_code == provider_code && p.is_open());
        if let Some(payment) = open {
            return Ok(payment);
        }
    }

    let reference = result
        .payment_id
        .clone()
        .or_else(|| result.order_id.map(|id| format!("order {}", id)))
        .unwrap_or_else(|| "webhook without references".to_string());
    Err(ShopError::PaymentNotFound { reference })
}

fn check_capture(payment: &Payment, amount: Option<Decimal>, in_flight: bool) -> ShopResult<()> {
    if !payment.can_be_captured() || in_flight {
        return Err(ShopError::PaymentStateConflict {
            payment_id: payment.id,
            status: payment.status(),
            expected: "authorized",
        });
    }
    if let Some(requested) = amount {
        if requested <= Decimal::ZERO || requested > payment.amount {
            return Err(ShopError::Validation(format!(
                "Capture amount {} must be between 0 and {}",
                requested, payment.amount
            )));
        }
    }
    Ok(())
}

/// Returns `(requested, refundable)`
fn check_refund(
    payment: &Payment,
    amount: Option<Decimal>,
    ledger: &[Transaction],
) -> ShopResult<(Decimal, Decimal)> {
    if !payment.can_be_refunded() {
        return Err(ShopError::PaymentStateConflict {
            payment_id: payment.id,
            status: payment.status(),
            expected: "completed or captured",
        });
    }
    let refundable = payment.refundable_amount(ledger);
    let requested = amount.unwrap_or(refundable);
    if requested <= Decimal::ZERO || requested > refundable {
        return Err(ShopError::InvalidRefundAmount {
            requested,
            refundable,
        });
    }
    Ok((requested, refundable))
}

/// Turn a pending capture/refund into its final ledger row
fn settle_reservation(
    tx: &mut dyn Tx,
    reservation: Transaction,
    result: &OperationResult,
    amount: Option<Decimal>,
) -> ShopResult<()> {
    let mut record = reservation
        .with_amount(amount)
        .with_external_id(result.transaction_id.clone())
        .with_error(result.error_message.clone())
        .with_response(result.raw_response.clone());
    record.success = result.success;
    record.pending = false;
    tx.update_transaction(&record)
}

fn outcome(payment: &Payment, result: &OperationResult, amount: Option<Decimal>) -> OperationOutcome {
    OperationOutcome {
        success: result.success,
        payment_id: payment.id,
        payment_status: payment.status(),
        transaction_id: result.transaction_id.clone(),
        amount,
        error: result.error_message.clone(),
    }
}
