//! # Payment Provider Contract
//!
//! Strategy-pattern trait implemented by every payment integration.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 PaymentProvider (trait)                      │
//! │  ├── start_payment()         required                        │
//! │  ├── handle_webhook()        required                        │
//! │  ├── get_payment_status()    required                        │
//! │  ├── validate_webhook_signature()   default: accept          │
//! │  ├── as_capture() ─▶ CaptureCapability   optional            │
//! │  └── as_refund()  ─▶ RefundCapability    optional            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capture and refund live on separate capability traits. A provider that
//! implements one exposes it through `as_capture` / `as_refund`, and the
//! capability flags are derived from those accessors, so orchestration can
//! never call an operation the provider does not have.

use crate::error::ShopResult;
use crate::money::Currency;
use crate::order::Order;
use crate::payment::Payment;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Free-form per-call options passed through to the provider
pub type ProviderOptions = BTreeMap<String, Value>;

/// Outcome of `start_payment`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitResult {
    pub success: bool,

    /// Hosted payment page to send the customer to
    pub redirect_url: Option<String>,

    /// Fields for an auto-submitted form (embedded flows)
    pub form_data: Option<Value>,

    /// Data for rendering an inline payment widget
    pub render_data: Option<Value>,

    /// Provider's reference for this attempt
    pub external_id: Option<String>,

    pub error_message: Option<String>,
    pub raw_response: Option<Value>,
}

impl InitResult {
    pub fn redirect(url: impl Into<String>, external_id: Option<String>) -> Self {
        Self {
            success: true,
            redirect_url: Some(url.into()),
            external_id,
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Inbound provider notification (callback redirect or server push)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookRequest {
    pub method: String,
    pub query: BTreeMap<String, String>,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            ..Default::default()
        }
    }

    pub fn get() -> Self {
        Self::new("GET")
    }

    pub fn post(body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST").with_body(body)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn is_post(&self) -> bool {
        self.method == "POST"
    }

    /// Raw body as JSON; `None` for an empty body
    pub fn json_body(&self) -> serde_json::Result<Option<Value>> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&self.body).map(Some)
    }

    /// Request snapshot kept on the webhook transaction
    pub fn to_raw(&self) -> Value {
        let body = self
            .json_body()
            .ok()
            .flatten()
            .unwrap_or_else(|| Value::String(String::from_utf8_lossy(&self.body).into_owned()));
        serde_json::json!({
            "method": self.method,
            "query": self.query,
            "body": body,
        })
    }
}

/// Normalized external payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Authorized,
    Completed,
    Failed,
    Canceled,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Authorized => "authorized",
            WebhookStatus::Completed => "completed",
            WebhookStatus::Failed => "failed",
            WebhookStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of `handle_webhook` / `get_payment_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResult {
    pub success: bool,
    pub order_id: Option<Uuid>,
    /// Provider's payment reference (matches `Payment::external_id`)
    pub payment_id: Option<String>,
    pub status: WebhookStatus,
    pub amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub transaction_id: Option<String>,
    pub raw_data: Option<Value>,
    pub error_message: Option<String>,
}

impl WebhookResult {
    pub fn new(status: WebhookStatus) -> Self {
        Self {
            success: true,
            order_id: None,
            payment_id: None,
            status,
            amount: None,
            currency: None,
            transaction_id: None,
            raw_data: None,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::new(WebhookStatus::Failed)
        }
    }
}

/// Outcome of capture / refund
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub error_message: Option<String>,
    pub raw_response: Option<Value>,
}

impl OperationResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Capability flags, derived from the provider's trait accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_capture: bool,
    pub supports_refund: bool,
    pub supports_partial_refund: bool,
    pub supports_webhooks: bool,
}

/// Core trait for payment provider implementations.
///
/// Instances are cached by the registry and shared between requests, so
/// implementations hold configuration only, never per-request state.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Registry code (e.g. "dummy")
    fn code(&self) -> &str;

    fn display_name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn test_mode(&self) -> bool {
        false
    }

    /// Begin an external payment flow for the order.
    ///
    /// # Arguments
    /// * `order` - The order being paid (status `pending_payment`)
    /// * `return_url` - Where the customer lands after the hosted flow
    /// * `notify_url` - Server-to-server notification endpoint
    /// * `options` - Provider-specific extras
    async fn start_payment(
        &self,
        order: &Order,
        return_url: &str,
        notify_url: &str,
        options: &ProviderOptions,
    ) -> ShopResult<InitResult>;

    /// Parse an inbound notification into a normalized result.
    async fn handle_webhook(&self, request: &WebhookRequest) -> ShopResult<WebhookResult>;

    /// Poll the provider for the current state of an external payment.
    async fn get_payment_status(&self, external_id: &str) -> ShopResult<WebhookResult>;

    /// Authenticity check for inbound notifications. Accepts everything by
    /// default; real integrations must override it.
    fn validate_webhook_signature(&self, _request: &WebhookRequest) -> bool {
        true
    }

    fn supports_webhooks(&self) -> bool {
        true
    }

    fn as_capture(&self) -> Option<&dyn CaptureCapability> {
        None
    }

    fn as_refund(&self) -> Option<&dyn RefundCapability> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_capture: self.as_capture().is_some(),
            supports_refund: self.as_refund().is_some(),
            supports_partial_refund: self
                .as_refund()
                .map(|r| r.supports_partial_refund())
                .unwrap_or(false),
            supports_webhooks: self.supports_webhooks(),
        }
    }

    /// Decimal amount to the provider's minor-unit integer
    fn format_amount(&self, amount: Decimal, currency: Currency) -> ShopResult<i64> {
        currency.to_minor_units(amount)
    }

    /// Minor-unit integer back to a decimal amount
    fn parse_amount(&self, amount: i64, currency: Currency) -> Decimal {
        currency.from_minor_units(amount)
    }
}

/// Settle a previously authorized hold
#[async_trait]
pub trait CaptureCapability: Send + Sync {
    async fn capture(
        &self,
        order: &Order,
        payment: &Payment,
        amount: Option<Decimal>,
        options: &ProviderOptions,
    ) -> ShopResult<OperationResult>;
}

/// Return funds for a settled payment
#[async_trait]
pub trait RefundCapability: Send + Sync {
    fn supports_partial_refund(&self) -> bool {
        true
    }

    async fn refund(
        &self,
        order: &Order,
        payment: &Payment,
        amount: Option<Decimal>,
        reason: &str,
        options: &ProviderOptions,
    ) -> ShopResult<OperationResult>;
}

/// Shared provider handle
pub type BoxedPaymentProvider = Arc<dyn PaymentProvider>;

/// Entry for payment method pickers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub code: String,
    pub name: String,
    pub description: String,
    pub test_mode: bool,
}

impl PaymentMethod {
    pub fn of(provider: &dyn PaymentProvider) -> Self {
        Self {
            code: provider.code().to_string(),
            name: provider.display_name().to_string(),
            description: provider.description().to_string(),
            test_mode: provider.test_mode(),
        }
    }
}
