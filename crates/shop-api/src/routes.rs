//! # Routes
//!
//! Axum router configuration for the storefront API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
///
/// Routes:
/// - API v1:
///   - GET  /api/v1/payment-methods - Providers available for checkout
///   - POST /api/v1/orders - Place an order from cart lines
///   - GET  /api/v1/orders/{number} - Order summary
///   - POST /api/v1/orders/{number}/cancel - Cancel (restores stock when paid)
///   - POST /api/v1/orders/{number}/transitions/{transition} - Fulfilment
///   - POST /api/v1/orders/{number}/payments - Start a payment
///   - GET  /api/v1/payments/{id}/status - Ask the provider
///   - POST /api/v1/payments/{id}/capture - Capture an authorization
///   - POST /api/v1/payments/{id}/refund - Full or partial refund
///
/// - Provider callbacks:
///   - GET|POST /webhook/{provider} - Notifications
///   - GET /payments/return/{number}/{provider} - Customer return page
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let order_routes = Router::new()
        .route("/", post(handlers::create_order))
        .route("/{number}", get(handlers::get_order))
        .route("/{number}/cancel", post(handlers::cancel_order))
        .route(
            "/{number}/transitions/{transition}",
            post(handlers::apply_transition),
        )
        .route("/{number}/payments", post(handlers::initiate_payment));

    let payment_routes = Router::new()
        .route("/{payment_id}/status", get(handlers::payment_status))
        .route("/{payment_id}/capture", post(handlers::capture_payment))
        .route("/{payment_id}/refund", post(handlers::refund_payment));

    let api_routes = Router::new()
        .route("/payment-methods", get(handlers::payment_methods))
        .nest("/orders", order_routes)
        .nest("/payments", payment_routes);

    // Signatures are checked against the raw body, so no body-rewriting layers here
    let webhook_routes = Router::new().route(
        "/{provider}",
        get(handlers::provider_webhook).post(handlers::provider_webhook),
    );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/", get(handlers::health))
        .route(
            "/payments/return/{number}/{provider}",
            get(handlers::payment_return),
        )
        .nest("/api/v1", api_routes)
        .nest("/webhook", webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppConfig;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use shop_core::{Product, ProductCatalog, ShopConfig};

    const BASE_URL: &str = "http://shop.test";

    fn server(shop_toml: &str) -> TestServer {
        let mut catalog = ProductCatalog::new();
        catalog.add(Product::new("tee", "TEE-M", "T-Shirt", dec!(10.00)).with_stock(10));
        catalog.add(Product::new("mug", "MUG-01", "Mug", dec!(9.50)).with_stock(1));

        let config = AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            base_url: BASE_URL.to_string(),
            environment: "test".to_string(),
        };
        let shop = ShopConfig::from_toml(shop_toml).unwrap();
        let state = AppState::from_parts(config, &shop, &catalog).unwrap();
        TestServer::new(create_router(state)).unwrap()
    }

    fn address() -> Value {
        json!({
            "first_name": "Ana",
            "last_name": "García",
            "address_line_1": "Calle Mayor 1",
            "city": "Madrid",
            "state": "Madrid",
            "postal_code": "28013"
        })
    }

    fn order_request(items: Value) -> Value {
        json!({
            "items": items,
            "billing": address(),
            "shipping": address(),
            "guest_email": "ana@example.com",
            "terms_accepted": true
        })
    }

    async fn place_order(server: &TestServer, items: Value) -> String {
        let response = server.post("/api/v1/orders").json(&order_request(items)).await;
        response.assert_status(StatusCode::CREATED);
        let summary: Value = response.json();
        summary["order"]["number"].as_str().unwrap().to_string()
    }

    async fn order_status(server: &TestServer, number: &str) -> String {
        let summary: Value = server
            .get(&format!("/api/v1/orders/{}", number))
            .await
            .json();
        summary["status"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let server = server("");
        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_payment_methods() {
        let server = server("");
        let body: Value = server.get("/api/v1/payment-methods").await.json();
        assert_eq!(body["count"], 1);
        assert_eq!(body["methods"][0]["code"], "dummy");
    }

    #[tokio::test]
    async fn test_pay_through_return_page_then_refund() {
        let server = server("[providers.dummy]\nsuccess_rate = 100\n");
        let number = place_order(&server, json!([{ "product_id": "tee", "quantity": 2 }])).await;
        assert_eq!(order_status(&server, &number).await, "pending_payment");

        let response = server
            .post(&format!("/api/v1/orders/{}/payments", number))
            .json(&json!({ "provider": "dummy" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let started: Value = response.json();
        let payment_id = started["payment_id"].as_str().unwrap().to_string();
        let redirect = started["redirect_url"].as_str().unwrap();
        let path = redirect.strip_prefix(BASE_URL).unwrap();
        assert!(path.starts_with(&format!("/payments/return/{}/dummy?", number)));

        let page = server.get(path).await;
        page.assert_status_ok();
        assert!(page.text().contains("Payment Successful"));
        assert_eq!(order_status(&server, &number).await, "paid");

        let status: Value = server
            .get(&format!("/api/v1/payments/{}/status", payment_id))
            .await
            .json();
        assert_eq!(status["status"], "completed");

        let refund = server
            .post(&format!("/api/v1/payments/{}/refund", payment_id))
            .json(&json!({ "reason": "damaged" }))
            .await;
        refund.assert_status_ok();
        let outcome: Value = refund.json();
        assert_eq!(outcome["payment_status"], "refunded");
        assert_eq!(order_status(&server, &number).await, "refunded");
    }

    #[tokio::test]
    async fn test_return_page_checks_the_order_number() {
        let server = server("");
        let mine = place_order(&server, json!([{ "product_id": "tee" }])).await;
        let other = place_order(&server, json!([{ "product_id": "tee" }])).await;

        let started: Value = server
            .post(&format!("/api/v1/orders/{}/payments", other))
            .json(&json!({ "provider": "dummy" }))
            .await
            .json();
        let redirect = started["redirect_url"].as_str().unwrap();
        let (_, query) = redirect.split_once('?').unwrap();

        let page = server
            .get(&format!("/payments/return/{}/dummy?{}", mine, query))
            .await;
        page.assert_status(StatusCode::BAD_REQUEST);
        assert!(!page.text().contains("Payment Successful"));
        assert_eq!(order_status(&server, &mine).await, "pending_payment");
    }

    #[tokio::test]
    async fn test_invalid_checkout_lists_missing_fields() {
        let server = server("");
        let mut request = order_request(json!([{ "product_id": "tee" }]));
        request["billing"]["city"] = json!("");

        let response = server.post("/api/v1/orders").json(&request).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["kind"], "validation");
        assert_eq!(body["details"], json!(["billing_city"]));
    }

    #[tokio::test]
    async fn test_unknown_product_and_order() {
        let server = server("");
        let response = server
            .post("/api/v1/orders")
            .json(&order_request(json!([{ "product_id": "ghost" }])))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = server.get("/api/v1/orders/ORD-000000-0000").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_transitions_and_cancel() {
        let server = server("");
        let number = place_order(&server, json!([{ "product_id": "mug" }])).await;

        // payment transitions go through the payment endpoints
        let response = server
            .post(&format!("/api/v1/orders/{}/transitions/mark_as_paid", number))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        // not paid yet
        let response = server
            .post(&format!("/api/v1/orders/{}/transitions/ship", number))
            .await;
        response.assert_status(StatusCode::CONFLICT);

        let response = server
            .post(&format!("/api/v1/orders/{}/cancel?actor=support", number))
            .await;
        response.assert_status_ok();
        assert_eq!(order_status(&server, &number).await, "canceled");

        let response = server
            .post(&format!("/api/v1/orders/{}/payments", number))
            .json(&json!({ "provider": "dummy" }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_webhook_ack_policy() {
        let retry = server("");
        let response = retry
            .post("/webhook/dummy")
            .json(&json!({ "payment_id": "dummy_unknown", "status": "completed" }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["success"], false);

        let unknown = retry.get("/webhook/nope").await;
        unknown.assert_status(StatusCode::NOT_FOUND);

        let ack = server("[payments]\nwebhook_ack = \"acknowledge\"\n");
        let response = ack
            .post("/webhook/dummy")
            .json(&json!({ "payment_id": "dummy_unknown", "status": "completed" }))
            .await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_unsigned_webhook_rejected_when_secret_set() {
        let server = server(
            "[payments]\nwebhook_ack = \"acknowledge\"\n\n[providers.dummy]\nwebhook_secret = \"whsec_api\"\n",
        );
        let response = server
            .post("/webhook/dummy")
            .json(&json!({ "payment_id": "dummy_1", "status": "completed" }))
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}
