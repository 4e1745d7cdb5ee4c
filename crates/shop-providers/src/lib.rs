//! # shop-providers
//!
//! Built-in payment providers for the storefront.
//!
//! 1. **DummyProvider** (`dummy`) - simulated hosted payment page
//!    - Configurable success rate and latency
//!    - Capture and (partial) refund
//!    - Optional HMAC-signed webhooks and return redirects
//!    - Best for: development, demos, end-to-end tests
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shop_core::{ProviderRegistry, ShopConfig};
//! use shop_providers::register_builtin_providers;
//!
//! let config = ShopConfig::load()?;
//! let registry = ProviderRegistry::new().with_settings(config.providers.clone());
//! register_builtin_providers(&registry)?;
//!
//! let dummy = registry.get("dummy")?;
//! ```

pub mod config;
pub mod dummy;
pub mod signature;

use shop_core::{BoxedPaymentProvider, ProviderRegistry, ShopResult};
use std::sync::Arc;
use tracing::info;

// Re-exports
pub use config::DummyConfig;
pub use dummy::{DummyProvider, DUMMY_CODE};
pub use signature::{sign_payload, sign_return, verify_payload, SignatureHeader, SIGNATURE_HEADER};

/// Register every provider shipped with this crate
pub fn register_builtin_providers(registry: &ProviderRegistry) -> ShopResult<()> {
    registry.register_fn(DUMMY_CODE, |settings| {
        let provider: BoxedPaymentProvider = Arc::new(DummyProvider::from_settings(settings)?);
        Ok(provider)
    })?;
    info!(providers = ?registry.codes(), "Built-in payment providers registered");
    Ok(())
}
