//! # Application State
//!
//! Shared state for the Axum application.
//! Holds the order and payment services over one store, plus server config.

use shop_core::config::CONFIG_DIRS;
use shop_core::{
    FileConfigSource, MemoryStore, OrderService, PaymentService, ProductCatalog,
    ProviderRegistry, ShopConfig, ShopResult, WebhookAckPolicy,
};
use shop_providers::register_builtin_providers;
use std::net::{AddrParseError, SocketAddr};
use std::path::Path;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL for return and notification callbacks
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService<MemoryStore>,
    pub payments: PaymentService<MemoryStore>,
    /// How webhook failures are answered
    pub webhook_ack: WebhookAckPolicy,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// State from `config/shop.toml`, `config/products.toml` and the
    /// environment. Provider settings reload from the config file.
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        let shop = ShopConfig::load()?;
        let catalog = load_product_catalog()?;

        let registry = ProviderRegistry::with_source(Arc::new(FileConfigSource))?;
        register_builtin_providers(&registry)?;

        Ok(Self::assemble(config, &shop, &catalog, registry)?)
    }

    /// State from explicit parts (tests, embedding)
    pub fn from_parts(
        config: AppConfig,
        shop: &ShopConfig,
        catalog: &ProductCatalog,
    ) -> ShopResult<Self> {
        let registry = ProviderRegistry::new().with_settings(shop.providers.clone());
        register_builtin_providers(&registry)?;
        Self::assemble(config, shop, catalog, registry)
    }

    fn assemble(
        config: AppConfig,
        shop: &ShopConfig,
        catalog: &ProductCatalog,
        registry: ProviderRegistry,
    ) -> ShopResult<Self> {
        let store = Arc::new(MemoryStore::with_catalog(catalog)?);
        let orders = OrderService::new(store, shop.orders.clone());
        let payments = PaymentService::new(orders.clone(), Arc::new(registry), &shop.payments);

        Ok(Self {
            orders,
            payments,
            webhook_ack: shop.payments.webhook_ack,
            config,
        })
    }

    /// Where the customer comes back to after the provider's hosted flow
    pub fn return_url(&self, order_number: &str, provider: &str) -> String {
        format!(
            "{}/payments/return/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            order_number,
            provider
        )
    }

    /// Server-to-server notification endpoint for a provider
    pub fn notify_url(&self, provider: &str) -> String {
        format!("{}/webhook/{}", self.config.base_url.trim_end_matches('/'), provider)
    }
}

/// Load product stock records from config/products.toml
fn load_product_catalog() -> anyhow::Result<ProductCatalog> {
    for dir in CONFIG_DIRS {
        let path = Path::new(dir).join("products.toml");
        if let Ok(content) = std::fs::read_to_string(&path) {
            let catalog = ProductCatalog::from_toml(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            tracing::info!("Loaded {} products from {}", catalog.products.len(), path.display());
            return Ok(catalog);
        }
    }

    // Return empty catalog if no config found
    tracing::warn!("No product catalog found, using empty catalog");
    Ok(ProductCatalog::new())
}
