//! # shop-core
//!
//! Order lifecycle, payment ledger and provider contract for the storefront.
//!
//! This crate provides:
//! - `Cart`, `CheckoutData` and `Address` for the checkout input
//! - `Order` with its table-driven status machine and audit history
//! - `Payment` / `Transaction` ledger records
//! - `PaymentProvider` trait and the `ProviderRegistry`
//! - `OrderService` / `PaymentService` orchestration over a `Store`
//! - `ShopError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use shop_core::{Cart, MemoryStore, OrderService, PaymentService, ProviderRegistry};
//!
//! let orders = OrderService::new(store, config.orders.clone());
//! let order = orders.place_order(&cart, None, &checkout)?;
//!
//! let payments = PaymentService::new(orders, registry, &config.payments);
//! let started = payments
//!     .initiate_payment(order.id, "dummy", &return_url, &notify_url, Default::default())
//!     .await?;
//!
//! // Redirect the customer to started.redirect_url
//! ```

pub mod address;
pub mod cart;
pub mod config;
pub mod error;
pub mod memory_store;
pub mod money;
pub mod order;
pub mod order_service;
pub mod payment;
pub mod payment_service;
pub mod product;
pub mod provider;
pub mod registry;
pub mod store;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use address::{Address, AddressFields, CheckoutData, REQUIRED_ADDRESS_FIELDS};
pub use cart::{Cart, CartLine, CartOwner, CartView};
pub use config::{FileConfigSource, OrderSettings, PaymentSettings, ShopConfig, WebhookAckPolicy};
pub use error::{ErrorKind, ShopError, ShopResult};
pub use memory_store::MemoryStore;
pub use money::{display_amount, Currency};
pub use order::{
    Order, OrderItem, OrderStatus, OrderStatusHistory, OrderTotals, StatusChange, Transition,
    UserRef,
};
pub use order_service::{OrderService, OrderSummary, StatusHistoryHook, TransitionHook};
pub use payment::{Payment, PaymentStatus, Transaction, TransactionType};
pub use payment_service::{OperationOutcome, PaymentInitiation, PaymentService, WebhookOutcome};
pub use product::{Product, ProductCatalog};
pub use provider::{
    BoxedPaymentProvider, Capabilities, CaptureCapability, InitResult, OperationResult,
    PaymentMethod, PaymentProvider, ProviderOptions, RefundCapability, WebhookRequest,
    WebhookResult, WebhookStatus,
};
pub use registry::{ProviderConfigSource, ProviderFactory, ProviderRegistry, ProviderSettings};
pub use store::{Store, Tx};
