//! # shop-api
//!
//! HTTP API layer for the storefront.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - REST endpoints for orders and payments
//! - Provider webhook and return-page handlers
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/health` | Health check |
//! | GET | `/api/v1/payment-methods` | Providers available for checkout |
//! | POST | `/api/v1/orders` | Place an order |
//! | GET | `/api/v1/orders/{number}` | Order summary |
//! | POST | `/api/v1/orders/{number}/cancel` | Cancel an order |
//! | POST | `/api/v1/orders/{number}/transitions/{transition}` | start_processing, ship, deliver |
//! | POST | `/api/v1/orders/{number}/payments` | Start a payment |
//! | GET | `/api/v1/payments/{id}/status` | Provider-side status |
//! | POST | `/api/v1/payments/{id}/capture` | Capture |
//! | POST | `/api/v1/payments/{id}/refund` | Refund |
//! | GET/POST | `/webhook/{provider}` | Provider notification |
//! | GET | `/payments/return/{number}/{provider}` | Customer return page |

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
