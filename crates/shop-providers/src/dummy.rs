//! # Dummy Provider
//!
//! Development provider that simulates a hosted payment page without moving
//! money. Every operation succeeds with probability `success_rate`%.
//!
//! ```text
//! start_payment ─▶ redirect: {return_url}?payment_id=…&status=success&order_id=…
//! customer lands on the return URL ─▶ GET webhook with the same query
//! server push ─▶ POST {"payment_id": …, "status": …, "order_id": …}
//! ```

use crate::config::DummyConfig;
use crate::signature::{self, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER};
use async_trait::async_trait;
use chrono::Utc;
use rand_core::{OsRng, RngCore};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use shop_core::{
    CaptureCapability, InitResult, OperationResult, Order, Payment, PaymentProvider,
    ProviderOptions, ProviderSettings, RefundCapability, ShopResult, WebhookRequest,
    WebhookResult, WebhookStatus,
};
use std::str::FromStr;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub const DUMMY_CODE: &str = "dummy";

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    config: DummyConfig,
}

impl DummyProvider {
    pub fn new(config: DummyConfig) -> Self {
        Self { config }
    }

    pub fn from_settings(settings: &ProviderSettings) -> ShopResult<Self> {
        Ok(Self::new(DummyConfig::from_settings(settings)?))
    }

    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    fn roll(&self) -> bool {
        match self.config.success_rate {
            0 => false,
            rate if rate >= 100 => true,
            rate => OsRng.next_u32() % 100 < u32::from(rate),
        }
    }

    async fn simulate_latency(&self) {
        if !self.config.processing_delay.is_zero() {
            tokio::time::sleep(self.config.processing_delay).await;
        }
    }

    fn operation(
        &self,
        kind: &str,
        order: &Order,
        payment: &Payment,
        amount: Option<Decimal>,
        extra: Value,
    ) -> OperationResult {
        if !self.roll() {
            return OperationResult::failure(format!("Dummy {} failed (simulated failure)", kind));
        }

        let amount = amount.unwrap_or(payment.amount);
        let transaction_id = format!("{}_{}_{}", kind, Utc::now().timestamp(), order.number);
        let mut raw = json!({
            "dummy_id": transaction_id,
            "dummy_amount": amount.to_string(),
            "dummy_currency": payment.currency,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let (Some(raw), Value::Object(extra)) = (raw.as_object_mut(), extra) {
            raw.extend(extra);
        }

        OperationResult {
            success: true,
            transaction_id: Some(transaction_id),
            amount: Some(amount),
            currency: Some(payment.currency),
            error_message: None,
            raw_response: Some(raw),
        }
    }

    fn verify_return_signature(&self, secret: &str, request: &WebhookRequest) -> bool {
        let Some(given) = request.query_param("signature") else {
            warn!("Dummy return redirect without signature");
            return false;
        };
        let payment_id = request.query_param("payment_id").unwrap_or("");
        let status = request.query_param("status").unwrap_or("");
        let order_id = request.query_param("order_id").unwrap_or("");

        match signature::sign_return(secret, payment_id, status, order_id) {
            Ok(expected) => signature::constant_time_compare(given, &expected),
            Err(e) => {
                warn!(error = %e, "Could not compute dummy return signature");
                false
            }
        }
    }
}

/// `success|completed → completed`, anything unknown stays pending
fn map_status(status: &str) -> WebhookStatus {
    match status {
        "success" | "completed" => WebhookStatus::Completed,
        "authorized" => WebhookStatus::Authorized,
        "failed" => WebhookStatus::Failed,
        "canceled" | "cancelled" => WebhookStatus::Canceled,
        _ => WebhookStatus::Pending,
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

#[async_trait]
impl PaymentProvider for DummyProvider {
    fn code(&self) -> &str {
        DUMMY_CODE
    }

    fn display_name(&self) -> &str {
        "Dummy Payment (Development)"
    }

    fn description(&self) -> &str {
        "Fake payment provider for development and testing"
    }

    fn test_mode(&self) -> bool {
        self.config.test_mode
    }

    #[instrument(skip(self, order, options), fields(order = %order.number))]
    async fn start_payment(
        &self,
        order: &Order,
        return_url: &str,
        _notify_url: &str,
        options: &ProviderOptions,
    ) -> ShopResult<InitResult> {
        self.simulate_latency().await;

        if !self.roll() {
            return Ok(InitResult::failure("Dummy payment failed (simulated failure)"));
        }

        let external_id = format!(
            "dummy_{}_{}",
            Utc::now().timestamp(),
            &Uuid::new_v4().simple().to_string()[..12]
        );
        let status = if self.config.auto_capture {
            "success"
        } else {
            "authorized"
        };
        let order_id = order.id.to_string();

        let separator = if return_url.contains('?') { '&' } else { '?' };
        let mut redirect_url = format!(
            "{}{}payment_id={}&status={}&order_id={}",
            return_url, separator, external_id, status, order_id
        );
        if let Some(secret) = &self.config.webhook_secret {
            let sig = signature::sign_return(secret, &external_id, status, &order_id)?;
            redirect_url.push_str("&signature=");
            redirect_url.push_str(&sig);
        }

        debug!(external_id = %external_id, "Dummy payment started");
        Ok(InitResult {
            success: true,
            redirect_url: Some(redirect_url),
            external_id: Some(external_id.clone()),
            raw_response: Some(json!({
                "dummy_payment_id": external_id,
                "dummy_status": status,
                "options": options,
            })),
            ..Default::default()
        })
    }

    async fn handle_webhook(&self, request: &WebhookRequest) -> ShopResult<WebhookResult> {
        let (payment_id, status, order_id, amount) = if request.is_post() {
            let body = match request.json_body() {
                Ok(Some(Value::Object(body))) => body,
                Ok(_) => {
                    return Ok(WebhookResult::failure(
                        "Failed to process dummy webhook: body is not a JSON object",
                    ))
                }
                Err(e) => {
                    return Ok(WebhookResult::failure(format!(
                        "Failed to process dummy webhook: {}",
                        e
                    )))
                }
            };
            let field = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
            let amount = match body.get("amount") {
                Some(Value::String(s)) => Decimal::from_str(s).ok(),
                Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
                _ => None,
            };
            (
                field("payment_id").filter(|v| !v.is_empty()),
                field("status").unwrap_or_else(|| "pending".to_string()),
                field("order_id"),
                amount,
            )
        } else {
            (
                non_empty(request.query_param("payment_id")),
                request.query_param("status").unwrap_or("pending").to_string(),
                request.query_param("order_id").map(str::to_string),
                None,
            )
        };

        let mut result = WebhookResult::new(map_status(&status));
        result.order_id = order_id.as_deref().and_then(|id| Uuid::parse_str(id).ok());
        result.transaction_id = payment_id.as_ref().map(|id| format!("txn_{}", id));
        result.amount = amount;
        result.raw_data = Some(json!({
            "dummy_payment_id": payment_id,
            "dummy_status": status,
            "dummy_order_id": order_id,
            "timestamp": Utc::now().to_rfc3339(),
        }));
        result.payment_id = payment_id;
        Ok(result)
    }

    async fn get_payment_status(&self, external_id: &str) -> ShopResult<WebhookResult> {
        let mut result = WebhookResult::new(WebhookStatus::Completed);
        result.payment_id = Some(external_id.to_string());
        result.transaction_id = Some(format!("status_{}", external_id));
        result.raw_data = Some(json!({
            "dummy_payment_id": external_id,
            "dummy_status": "completed",
            "timestamp": Utc::now().to_rfc3339(),
        }));
        Ok(result)
    }

    fn validate_webhook_signature(&self, request: &WebhookRequest) -> bool {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return true;
        };

        if !request.is_post() {
            return self.verify_return_signature(secret, request);
        }

        let Some(header) = request.header(SIGNATURE_HEADER) else {
            warn!("Dummy webhook without signature header");
            return false;
        };
        match signature::verify_payload(
            secret,
            header,
            &request.body,
            Utc::now().timestamp(),
            DEFAULT_TOLERANCE_SECS,
        ) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Dummy webhook signature rejected");
                false
            }
        }
    }

    fn as_capture(&self) -> Option<&dyn CaptureCapability> {
        Some(self)
    }

    fn as_refund(&self) -> Option<&dyn RefundCapability> {
        Some(self)
    }
}

#[async_trait]
impl CaptureCapability for DummyProvider {
    async fn capture(
        &self,
        order: &Order,
        payment: &Payment,
        amount: Option<Decimal>,
        _options: &ProviderOptions,
    ) -> ShopResult<OperationResult> {
        self.simulate_latency().await;
        Ok(self.operation("capture", order, payment, amount, Value::Null))
    }
}

#[async_trait]
impl RefundCapability for DummyProvider {
    async fn refund(
        &self,
        order: &Order,
        payment: &Payment,
        amount: Option<Decimal>,
        reason: &str,
        _options: &ProviderOptions,
    ) -> ShopResult<OperationResult> {
        self.simulate_latency().await;
        Ok(self.operation(
            "refund",
            order,
            payment,
            amount,
            json!({ "dummy_reason": reason }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(config: DummyConfig) -> DummyProvider {
        DummyProvider::new(config)
    }

    #[test]
    fn test_capabilities_all_on() {
        let caps = DummyProvider::default().capabilities();
        assert!(caps.supports_capture);
        assert!(caps.supports_refund);
        assert!(caps.supports_partial_refund);
        assert!(caps.supports_webhooks);
    }

    #[test]
    fn test_success_rate_extremes() {
        let always = provider(DummyConfig::default().with_success_rate(100));
        let never = provider(DummyConfig::default().with_success_rate(0));
        for _ in 0..50 {
            assert!(always.roll());
            assert!(!never.roll());
        }
    }

    #[tokio::test]
    async fn test_get_webhook_from_return_redirect() {
        let request = WebhookRequest::get()
            .with_query("payment_id", "dummy_1_abc")
            .with_query("status", "success")
            .with_query("order_id", "not-a-uuid");

        let result = DummyProvider::default().handle_webhook(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, WebhookStatus::Completed);
        assert_eq!(result.payment_id.as_deref(), Some("dummy_1_abc"));
        assert_eq!(result.transaction_id.as_deref(), Some("txn_dummy_1_abc"));
        assert_eq!(result.order_id, None);
    }

    #[tokio::test]
    async fn test_post_webhook_status_mapping() {
        let dummy = DummyProvider::default();
        for (raw, expected) in [
            ("completed", WebhookStatus::Completed),
            ("authorized", WebhookStatus::Authorized),
            ("failed", WebhookStatus::Failed),
            ("canceled", WebhookStatus::Canceled),
            ("bogus", WebhookStatus::Pending),
        ] {
            let body = json!({"payment_id": "p", "status": raw, "amount": "12.50"});
            let result = dummy
                .handle_webhook(&WebhookRequest::post(body.to_string()))
                .await
                .unwrap();
            assert_eq!(result.status, expected, "status {}", raw);
            assert_eq!(result.amount, Some(Decimal::new(1250, 2)));
        }
    }

    #[tokio::test]
    async fn test_malformed_post_is_a_failure_result() {
        let result = DummyProvider::default()
            .handle_webhook(&WebhookRequest::post("not json"))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Failed to process dummy webhook"));
    }

    #[test]
    fn test_unsigned_provider_accepts_everything() {
        assert!(DummyProvider::default().validate_webhook_signature(&WebhookRequest::post("{}")));
    }

    #[test]
    fn test_signed_post_webhooks() {
        let dummy = provider(DummyConfig::default().with_webhook_secret("whsec_dummy"));
        let body = r#"{"payment_id":"p","status":"completed"}"#;

        let unsigned = WebhookRequest::post(body);
        assert!(!dummy.validate_webhook_signature(&unsigned));

        let header =
            signature::sign_payload("whsec_dummy", Utc::now().timestamp(), body.as_bytes()).unwrap();
        let signed = WebhookRequest::post(body).with_header("X-Dummy-Signature", header.clone());
        assert!(dummy.validate_webhook_signature(&signed));

        let tampered = WebhookRequest::post(r#"{"payment_id":"p","status":"failed"}"#)
            .with_header("X-Dummy-Signature", header);
        assert!(!dummy.validate_webhook_signature(&tampered));
    }

    #[test]
    fn test_signed_return_redirect() {
        let dummy = provider(DummyConfig::default().with_webhook_secret("whsec_dummy"));
        let sig = signature::sign_return("whsec_dummy", "p1", "success", "o1").unwrap();

        let good = WebhookRequest::get()
            .with_query("payment_id", "p1")
            .with_query("status", "success")
            .with_query("order_id", "o1")
            .with_query("signature", sig.clone());
        assert!(dummy.validate_webhook_signature(&good));

        let forged = good.clone().with_query("status", "failed");
        assert!(!dummy.validate_webhook_signature(&forged));
    }
}
