//! Fixtures shared by the crate's unit tests.

use crate::address::{AddressFields, CheckoutData};
use crate::error::{ShopError, ShopResult};
use crate::memory_store::MemoryStore;
use crate::order::Order;
use crate::payment::Payment;
use crate::product::Product;
use crate::provider::{
    CaptureCapability, InitResult, OperationResult, PaymentProvider, ProviderOptions,
    RefundCapability, WebhookRequest, WebhookResult, WebhookStatus,
};
use crate::store::Store;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

fn address() -> AddressFields {
    [
        ("first_name", "Ana"),
        ("last_name", "García"),
        ("address_line_1", "Calle Mayor 1"),
        ("city", "Madrid"),
        ("state", "Madrid"),
        ("postal_code", "28013"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub(crate) fn checkout() -> CheckoutData {
    CheckoutData {
        billing: address(),
        shipping: address(),
        guest_email: Some("ana@example.com".into()),
        terms_accepted: true,
        ..Default::default()
    }
}

/// tee 10.00 × 10 in stock, mug 5.00 × 5, untracked e-book 7.50
pub(crate) fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .atomic(|tx| {
            tx.upsert_product(&Product::new("tee", "TEE-M", "T-Shirt", dec!(10.00)).with_stock(10))?;
            tx.upsert_product(&Product::new("mug", "MUG-1", "Mug", dec!(5.00)).with_stock(5))?;
            tx.upsert_product(&Product::new("ebook", "EB-1", "E-book", dec!(7.50)).untracked())
        })
        .unwrap();
    store
}

/// Provider whose behaviour is fixed at construction
pub(crate) struct ScriptedProvider {
    code: String,
    name: String,
    start_failure: Option<String>,
    start_error: bool,
    delay: Option<Duration>,
    signature_ok: bool,
    capture: bool,
    refund: bool,
    partial_refund: bool,
    operations_fail: bool,
    webhooks: bool,
    pub start_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            name: "Scripted".to_string(),
            start_failure: None,
            start_error: false,
            delay: None,
            signature_ok: true,
            capture: true,
            refund: true,
            partial_refund: true,
            operations_fail: false,
            webhooks: true,
            start_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub(crate) fn declining(mut self, message: &str) -> Self {
        self.start_failure = Some(message.to_string());
        self
    }

    pub(crate) fn erroring(mut self) -> Self {
        self.start_error = true;
        self
    }

    pub(crate) fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn rejecting_signatures(mut self) -> Self {
        self.signature_ok = false;
        self
    }

    pub(crate) fn without_capture(mut self) -> Self {
        self.capture = false;
        self
    }

    pub(crate) fn full_refunds_only(mut self) -> Self {
        self.partial_refund = false;
        self
    }

    pub(crate) fn failing_operations(mut self) -> Self {
        self.operations_fail = true;
        self
    }

    pub(crate) fn without_webhooks(mut self) -> Self {
        self.webhooks = false;
        self
    }

    fn operation(&self, amount: Option<Decimal>, payment: &Payment) -> OperationResult {
        if self.operations_fail {
            return OperationResult::failure("scripted failure");
        }
        OperationResult {
            success: true,
            transaction_id: Some(format!("op_{}", Uuid::new_v4().simple())),
            amount: Some(amount.unwrap_or(payment.amount)),
            currency: Some(payment.currency),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn code(&self) -> &str {
        &self.code
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn test_mode(&self) -> bool {
        true
    }

    async fn start_payment(
        &self,
        order: &Order,
        return_url: &str,
        _notify_url: &str,
        _options: &ProviderOptions,
    ) -> ShopResult<InitResult> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.start_error {
            return Err(ShopError::Provider {
                provider: self.code.clone(),
                message: "connection reset".into(),
            });
        }
        if let Some(message) = &self.start_failure {
            return Ok(InitResult::failure(message.clone()));
        }
        let external_id = format!("ext_{}", order.number);
        Ok(InitResult::redirect(
            format!("{}?payment_id={}", return_url, external_id),
            Some(external_id),
        ))
    }

    /// Body: `{"status": "...", "payment_id": "...", "order_id": "..."}`
    async fn handle_webhook(&self, request: &WebhookRequest) -> ShopResult<WebhookResult> {
        let body = request
            .json_body()
            .map_err(|e| ShopError::WebhookParseError(e.to_string()))?
            .ok_or_else(|| ShopError::WebhookParseError("empty body".into()))?;

        let status = match body["status"].as_str().unwrap_or("") {
            "completed" => WebhookStatus::Completed,
            "authorized" => WebhookStatus::Authorized,
            "failed" => WebhookStatus::Failed,
            "canceled" => WebhookStatus::Canceled,
            _ => WebhookStatus::Pending,
        };
        let mut result = WebhookResult::new(status);
        result.payment_id = body["payment_id"].as_str().map(str::to_string);
        result.order_id = body["order_id"]
            .as_str()
            .and_then(|id| Uuid::from_str(id).ok());
        result.raw_data = Some(body);
        Ok(result)
    }

    async fn get_payment_status(&self, external_id: &str) -> ShopResult<WebhookResult> {
        let mut result = WebhookResult::new(WebhookStatus::Completed);
        result.payment_id = Some(external_id.to_string());
        Ok(result)
    }

    fn validate_webhook_signature(&self, _request: &WebhookRequest) -> bool {
        self.signature_ok
    }

    fn supports_webhooks(&self) -> bool {
        self.webhooks
    }

    fn as_capture(&self) -> Option<&dyn CaptureCapability> {
        if self.capture {
            Some(self)
        } else {
            None
        }
    }

    fn as_refund(&self) -> Option<&dyn RefundCapability> {
        if self.refund {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl CaptureCapability for ScriptedProvider {
    async fn capture(
        &self,
        _order: &Order,
        payment: &Payment,
        amount: Option<Decimal>,
        _options: &ProviderOptions,
    ) -> ShopResult<OperationResult> {
        Ok(self.operation(amount, payment))
    }
}

#[async_trait]
impl RefundCapability for ScriptedProvider {
    fn supports_partial_refund(&self) -> bool {
        self.partial_refund
    }

    async fn refund(
        &self,
        _order: &Order,
        payment: &Payment,
        amount: Option<Decimal>,
        _reason: &str,
        _options: &ProviderOptions,
    ) -> ShopResult<OperationResult> {
        Ok(self.operation(amount, payment))
    }
}
