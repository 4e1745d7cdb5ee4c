//! # Shop Error Types
//!
//! Typed error handling for the order and payment core.
//! All fallible operations return `Result<T, ShopError>`.

use crate::order::OrderStatus;
use crate::payment::PaymentStatus;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Broad classification of a [`ShopError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input; nothing was written
    Validation,
    /// Operation not allowed in the current order/payment state
    Guard,
    /// Payment provider failure, decline or malformed notification
    Provider,
    /// Unknown provider code, order, payment or product
    NotFound,
    /// Storage, configuration or serialization fault
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Guard => "guard",
            ErrorKind::Provider => "provider",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Core error type for all order and payment operations
#[derive(Debug, Error)]
pub enum ShopError {
    /// Generic invalid input
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Required checkout fields are missing
    #[error("Missing required checkout fields: {}", .fields.join(", "))]
    InvalidCheckout { fields: Vec<String> },

    /// Order creation attempted from an empty cart
    #[error("Cannot create order from empty cart")]
    EmptyCart,

    /// Requested quantity exceeds tracked stock
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    /// Refund amount outside (0, refundable]
    #[error("Invalid refund amount {requested}: refundable amount is {refundable}")]
    InvalidRefundAmount {
        requested: Decimal,
        refundable: Decimal,
    },

    /// Transition attempted from a status that is not one of its sources
    #[error(
        "Cannot {transition} order {order}: status is {current}, allowed from [{}]",
        format_statuses(.allowed_from)
    )]
    InvalidTransition {
        order: String,
        transition: &'static str,
        current: OrderStatus,
        allowed_from: Vec<OrderStatus>,
    },

    /// Transition source is valid but its guard rejected it
    #[error("Cannot {transition} order {order}: {reason}")]
    TransitionGuard {
        order: String,
        transition: &'static str,
        reason: String,
    },

    /// Payment initiation against an order that is not awaiting payment
    #[error("Order {order} is not ready for payment (status is {status})")]
    OrderNotPayable { order: String, status: OrderStatus },

    /// Payment is in the wrong status for the requested operation
    #[error("Payment {payment_id} is {status}, expected {expected}")]
    PaymentStateConflict {
        payment_id: Uuid,
        status: PaymentStatus,
        expected: &'static str,
    },

    /// Provider does not declare the capability
    #[error("Provider {provider} does not support {operation}")]
    UnsupportedOperation {
        provider: String,
        operation: &'static str,
    },

    /// Unknown or unconstructible provider code
    #[error("Payment provider not available: {code}")]
    ProviderUnavailable { code: String },

    #[error("Order not found: {reference}")]
    OrderNotFound { reference: String },

    #[error("Payment not found: {reference}")]
    PaymentNotFound { reference: String },

    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },

    /// Payment provider reported an error or declined
    #[error("Provider error [{provider}]: {message}")]
    Provider { provider: String, message: String },

    /// Provider call exceeded the configured timeout
    #[error("Provider {provider} did not answer within {after_ms} ms")]
    ProviderTimeout { provider: String, after_ms: u64 },

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Unique constraint violation in the store
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_statuses(statuses: &[OrderStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ShopError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShopError::Validation(_)
            | ShopError::InvalidCheckout { .. }
            | ShopError::EmptyCart
            | ShopError::InsufficientStock { .. }
            | ShopError::InvalidRefundAmount { .. } => ErrorKind::Validation,
            ShopError::InvalidTransition { .. }
            | ShopError::TransitionGuard { .. }
            | ShopError::OrderNotPayable { .. }
            | ShopError::PaymentStateConflict { .. }
            | ShopError::UnsupportedOperation { .. } => ErrorKind::Guard,
            ShopError::Provider { .. }
            | ShopError::ProviderTimeout { .. }
            | ShopError::WebhookVerificationFailed(_)
            | ShopError::WebhookParseError(_) => ErrorKind::Provider,
            ShopError::ProviderUnavailable { .. }
            | ShopError::OrderNotFound { .. }
            | ShopError::PaymentNotFound { .. }
            | ShopError::ProductNotFound { .. } => ErrorKind::NotFound,
            ShopError::Conflict(_)
            | ShopError::Storage(_)
            | ShopError::Configuration(_)
            | ShopError::Serialization(_)
            | ShopError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShopError::ProviderTimeout { .. } | ShopError::Provider { .. } | ShopError::Conflict(_)
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ShopError::Validation(_) => 400,
            ShopError::InvalidCheckout { .. } => 400,
            ShopError::EmptyCart => 400,
            ShopError::InsufficientStock { .. } => 409,
            ShopError::InvalidRefundAmount { .. } => 400,
            ShopError::InvalidTransition { .. } => 409,
            ShopError::TransitionGuard { .. } => 409,
            ShopError::OrderNotPayable { .. } => 409,
            ShopError::PaymentStateConflict { .. } => 409,
            ShopError::UnsupportedOperation { .. } => 422,
            ShopError::ProviderUnavailable { .. } => 404,
            ShopError::OrderNotFound { .. } => 404,
            ShopError::PaymentNotFound { .. } => 404,
            ShopError::ProductNotFound { .. } => 404,
            ShopError::Provider { .. } => 502,
            ShopError::ProviderTimeout { .. } => 504,
            ShopError::WebhookVerificationFailed(_) => 401,
            ShopError::WebhookParseError(_) => 400,
            ShopError::Conflict(_) => 409,
            ShopError::Storage(_) => 500,
            ShopError::Configuration(_) => 500,
            ShopError::Serialization(_) => 500,
            ShopError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for ShopError {
    fn from(err: serde_json::Error) -> Self {
        ShopError::Serialization(err.to_string())
    }
}

/// Result type alias for shop operations
pub type ShopResult<T> = Result<T, ShopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ShopError::EmptyCart.kind(), ErrorKind::Validation);
        assert_eq!(
            ShopError::ProviderUnavailable { code: "x".into() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ShopError::OrderNotPayable {
                order: "ORD-202601-0001".into(),
                status: OrderStatus::Draft
            }
            .kind(),
            ErrorKind::Guard
        );
        assert_eq!(
            ShopError::WebhookParseError("bad json".into()).kind(),
            ErrorKind::Provider
        );
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = ShopError::InvalidTransition {
            order: "ORD-202601-0001".into(),
            transition: "ship",
            current: OrderStatus::Draft,
            allowed_from: vec![OrderStatus::Processing],
        };
        assert_eq!(
            err.to_string(),
            "Cannot ship order ORD-202601-0001: status is draft, allowed from [processing]"
        );
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ShopError::ProviderTimeout {
            provider: "dummy".into(),
            after_ms: 30_000
        }
        .is_retryable());
        assert!(!ShopError::EmptyCart.is_retryable());
    }

    #[test]
    fn test_missing_fields_message() {
        let err = ShopError::InvalidCheckout {
            fields: vec!["billing_city".into(), "shipping_state".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required checkout fields: billing_city, shipping_state"
        );
    }
}
