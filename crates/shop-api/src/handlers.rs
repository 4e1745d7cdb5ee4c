//! # Request Handlers
//!
//! Axum request handlers for the storefront API.
//! Handlers translate HTTP into service calls; every rule lives in shop-core.

use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shop_core::{
    Cart, CheckoutData, ErrorKind, Order, OrderSummary, ProviderOptions, ShopError, Store,
    Transition, UserRef, WebhookAckPolicy, WebhookOutcome, WebhookRequest,
};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Place order request: cart lines plus checkout data
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Items to purchase
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
    /// Registered customer; guests use `guest_email` instead
    #[serde(default)]
    pub user: Option<UserRef>,
    #[serde(flatten)]
    pub checkout: CheckoutData,
}

/// Item in an order request
#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    /// Product ID
    pub product_id: String,
    /// Quantity
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
pub struct ActorQuery {
    /// Who is performing the change (staff user, system job, ...)
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub provider: String,
    #[serde(default)]
    pub options: ProviderOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CaptureRequest {
    pub amount: Option<Decimal>,
    pub options: ProviderOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefundRequest {
    /// Defaults to the whole refundable amount
    pub amount: Option<Decimal>,
    pub reason: String,
    pub options: ProviderOptions,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16, kind: ErrorKind) -> Self {
        Self {
            error: error.into(),
            code,
            kind: kind.as_str(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn shop_error_to_response(err: ShopError) -> ApiError {
    let code = err.status_code();
    match err.kind() {
        ErrorKind::Internal => error!(error = %err, "Request failed"),
        ErrorKind::Provider => warn!(error = %err, "Provider error"),
        _ => info!(error = %err, "Request rejected"),
    }

    let mut response = ErrorResponse::new(err.to_string(), code, err.kind());
    if let ShopError::InvalidCheckout { fields } = err {
        response = response.with_details(fields);
    }
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

fn order_by_number(state: &AppState, number: &str) -> Result<Order, ApiError> {
    state
        .orders
        .get_order_by_number(number)
        .map_err(shop_error_to_response)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "storefront",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Providers available for checkout
pub async fn payment_methods(State(state): State<AppState>) -> impl IntoResponse {
    let methods = state.payments.available_payment_methods();
    Json(serde_json::json!({
        "count": methods.len(),
        "methods": methods,
    }))
}

/// Build a cart from the request lines and place the order
#[instrument(skip(state, request), fields(items = request.items.len()))]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderSummary>), ApiError> {
    let mut cart = match &request.user {
        Some(user) => Cart::for_user(user.id),
        None => Cart::for_session(format!("api-{}", Uuid::new_v4().simple())),
    };

    for line in &request.items {
        let product = state
            .orders
            .store()
            .read(|tx| tx.require_product(&line.product_id))
            .map_err(shop_error_to_response)?;
        cart.add_item(&product, line.quantity)
            .map_err(shop_error_to_response)?;
    }

    let order = state
        .orders
        .place_order(&cart, request.user, &request.checkout)
        .map_err(shop_error_to_response)?;

    let summary = state
        .orders
        .order_summary(&order.number)
        .map_err(shop_error_to_response)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<OrderSummary>, ApiError> {
    state
        .orders
        .order_summary(&number)
        .map(Json)
        .map_err(shop_error_to_response)
}

#[instrument(skip(state))]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Query(query): Query<ActorQuery>,
) -> Result<Json<OrderSummary>, ApiError> {
    let order = order_by_number(&state, &number)?;
    state
        .orders
        .cancel_order(order.id, query.actor.as_deref())
        .map_err(shop_error_to_response)?;
    get_order(State(state), Path(number)).await
}

/// Fulfilment transitions only; payment, cancel and refund have their own
/// endpoints because they carry side effects.
#[instrument(skip(state))]
pub async fn apply_transition(
    State(state): State<AppState>,
    Path((number, transition)): Path<(String, String)>,
    Query(query): Query<ActorQuery>,
) -> Result<Json<OrderSummary>, ApiError> {
    let transition = Transition::from_str(&transition).map_err(shop_error_to_response)?;
    if !transition.is_fulfilment() {
        return Err(shop_error_to_response(ShopError::Validation(format!(
            "Transition {} is not available here",
            transition
        ))));
    }

    let order = order_by_number(&state, &number)?;
    state
        .orders
        .transition(order.id, transition, query.actor.as_deref())
        .map_err(shop_error_to_response)?;
    get_order(State(state), Path(number)).await
}

#[instrument(skip(state, request), fields(provider = %request.provider))]
pub async fn initiate_payment(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = order_by_number(&state, &number)?;
    let return_url = state.return_url(&order.number, &request.provider);
    let notify_url = state.notify_url(&request.provider);

    let started = state
        .payments
        .initiate_payment(
            order.id,
            &request.provider,
            &return_url,
            &notify_url,
            request.options,
        )
        .await
        .map_err(shop_error_to_response)?;

    let status = if started.success {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(started)))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let payment = state
        .payments
        .get_payment(payment_id)
        .map_err(shop_error_to_response)?;
    let provider = state
        .payments
        .payment_status(payment_id)
        .await
        .map_err(shop_error_to_response)?;

    Ok(Json(serde_json::json!({
        "payment_id": payment.id,
        "status": payment.status(),
        "provider": provider,
    })))
}

#[instrument(skip(state, request))]
pub async fn capture_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<CaptureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .payments
        .capture_payment(payment_id, request.amount, request.options)
        .await
        .map_err(shop_error_to_response)?;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)))
}

#[instrument(skip(state, request))]
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .payments
        .refund_payment(payment_id, request.amount, &request.reason, request.options)
        .await
        .map_err(shop_error_to_response)?;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)))
}

fn webhook_request(
    method: &Method,
    query: BTreeMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> WebhookRequest {
    let mut request = WebhookRequest::new(method.as_str()).with_body(body.to_vec());
    request.query = query;
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    request
}

fn webhook_status(policy: WebhookAckPolicy, outcome: &WebhookOutcome) -> StatusCode {
    if outcome.success {
        return StatusCode::OK;
    }
    let failure =
        StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match policy {
        WebhookAckPolicy::SignalRetry => failure,
        WebhookAckPolicy::Acknowledge if failure == StatusCode::UNAUTHORIZED => failure,
        WebhookAckPolicy::Acknowledge => StatusCode::OK,
    }
}

/// Provider notifications (server push or GET callback)
#[instrument(skip(state, query, headers, body))]
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    method: Method,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request = webhook_request(&method, query, &headers, body);
    let outcome = state.payments.process_webhook(&provider, &request).await;

    if outcome.success {
        info!(payment = ?outcome.payment_id, status = ?outcome.payment_status, "Webhook processed");
    }
    (webhook_status(state.webhook_ack, &outcome), Json(outcome))
}

/// Customer lands here after the provider's hosted page
#[instrument(skip(state, query, headers))]
pub async fn payment_return(
    State(state): State<AppState>,
    Path((number, provider)): Path<(String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let request = webhook_request(&Method::GET, query, &headers, Bytes::new());
    let outcome = state.payments.process_webhook(&provider, &request).await;
    let order = state.orders.get_order_by_number(&number).ok();
    let paid = order
        .as_ref()
        .map(|order| order.status().holds_stock())
        .unwrap_or(false);

    // the callback must be for a payment of the order in the path
    let belongs = match (outcome.payment_id, order.as_ref()) {
        (Some(payment_id), Some(order)) => state
            .payments
            .get_payment(payment_id)
            .map(|payment| payment.order_id == order.id)
            .unwrap_or(false),
        _ => false,
    };
    if outcome.success && !belongs {
        warn!(order = %number, payment = ?outcome.payment_id, "Return callback for another order");
        return (
            StatusCode::BAD_REQUEST,
            Html(failure_page(&number, "This payment does not belong to this order.")),
        );
    }

    match (outcome.success, paid) {
        (true, true) => (StatusCode::OK, Html(success_page(&number))),
        (true, false) => (
            StatusCode::OK,
            Html(failure_page(&number, "The payment is authorized and awaits capture.")),
        ),
        (false, _) => {
            let status = webhook_status(WebhookAckPolicy::SignalRetry, &outcome);
            let message = outcome
                .error
                .unwrap_or_else(|| "The payment has not been confirmed.".to_string());
            (status, Html(failure_page(&number, &message)))
        }
    }
}

fn success_page(number: &str) -> String {
    format!(r#"
<!DOCTYPE html>
<html>
<head><title>Payment Successful</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%);">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Payment Successful!</h1>
        <p>Order: <code>{}</code></p>
        <p style="color: #666;">Your payment was processed successfully.</p>
    </div>
</body>
</html>
"#, number)
}

fn failure_page(number: &str, message: &str) -> String {
    format!(r#"
<!DOCTYPE html>
<html>
<head><title>Payment Not Completed</title></head>
<body style="font-family: system-ui; display: flex; justify-content: center; align-items: center; height: 100vh; margin: 0; background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%);">
    <div style="background: white; padding: 60px; border-radius: 16px; text-align: center;">
        <h1>Payment Not Completed</h1>
        <p>Order: <code>{}</code></p>
        <p style="color: #666;">{}</p>
    </div>
</body>
</html>
"#, number, html_escape(message))
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool, status_code: u16) -> WebhookOutcome {
        WebhookOutcome {
            success,
            payment_id: None,
            status: None,
            payment_status: None,
            error: None,
            error_kind: None,
            status_code,
        }
    }

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new("Test error", 400, ErrorKind::Validation);
        assert_eq!(err.error, "Test error");
        assert_eq!(err.code, 400);
        assert_eq!(err.kind, "validation");
    }

    #[test]
    fn test_shop_error_conversion() {
        let (status, Json(body)) = shop_error_to_response(ShopError::InvalidCheckout {
            fields: vec!["billing_city".into()],
        });
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.details, Some(vec!["billing_city".to_string()]));

        let (status, _) = shop_error_to_response(ShopError::OrderNotFound {
            reference: "ORD-1".into(),
        });
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_webhook_ack_policies() {
        let not_found = outcome(false, 404);
        assert_eq!(webhook_status(WebhookAckPolicy::SignalRetry, &not_found), StatusCode::NOT_FOUND);
        assert_eq!(webhook_status(WebhookAckPolicy::Acknowledge, &not_found), StatusCode::OK);

        let forged = outcome(false, 401);
        assert_eq!(webhook_status(WebhookAckPolicy::Acknowledge, &forged), StatusCode::UNAUTHORIZED);

        assert_eq!(webhook_status(WebhookAckPolicy::SignalRetry, &outcome(true, 200)), StatusCode::OK);
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<b>\"x\" & y</b>"), "&lt;b&gt;&quot;x&quot; &amp; y&lt;/b&gt;");
    }
}
