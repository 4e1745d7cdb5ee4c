//! # Shop Configuration
//!
//! Order, payment and provider settings loaded from `config/shop.toml`,
//! with environment overrides (a `.env` file is honoured through dotenvy).

use crate::error::{ShopError, ShopResult};
use crate::money::Currency;
use crate::registry::{ProviderConfigSource, ProviderSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Candidate locations, relative to the working directory
pub const CONFIG_DIRS: &[&str] = &["config", "../config", "../../config"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderSettings {
    /// Order number prefix (`ORD` → `ORD-202601-0001`)
    pub number_prefix: String,

    /// ISO-3166 alpha-2 used when an address has no country
    pub default_country: String,

    pub currency: Currency,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            number_prefix: "ORD".to_string(),
            default_country: "ES".to_string(),
            currency: Currency::EUR,
        }
    }
}

/// How webhook failures are reported back to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAckPolicy {
    /// Always answer 200 so the provider stops delivering
    Acknowledge,
    /// Answer with the failure's status code so the provider retries
    #[default]
    SignalRetry,
}

impl std::str::FromStr for WebhookAckPolicy {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "acknowledge" | "ack" => Ok(WebhookAckPolicy::Acknowledge),
            "signal_retry" | "retry" => Ok(WebhookAckPolicy::SignalRetry),
            other => Err(ShopError::Configuration(format!(
                "Unknown webhook ack policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    /// Upper bound for any single provider call
    pub provider_timeout_secs: u64,

    pub webhook_ack: WebhookAckPolicy,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 30,
            webhook_ack: WebhookAckPolicy::SignalRetry,
        }
    }
}

impl PaymentSettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Complete shop configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopConfig {
    pub orders: OrderSettings,
    pub payments: PaymentSettings,

    /// `[providers.<code>]` tables, interpreted by each provider
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl ShopConfig {
    pub fn from_toml(toml_str: &str) -> ShopResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ShopError::Configuration(format!("Invalid shop config: {}", e)))
    }

    pub fn from_file(path: &Path) -> ShopResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShopError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// First existing `shop.toml` among [`CONFIG_DIRS`]
    pub fn locate() -> Option<PathBuf> {
        CONFIG_DIRS
            .iter()
            .map(|dir| Path::new(dir).join("shop.toml"))
            .find(|path| path.exists())
    }

    /// Load from the located file (defaults if none) and apply environment
    /// overrides.
    pub fn load() -> ShopResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = match Self::locate() {
            Some(path) => {
                debug!(path = %path.display(), "Loading shop config");
                Self::from_file(&path)?
            }
            None => {
                warn!("config/shop.toml not found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// `ORDER_NUMBER_PREFIX`, `PAYMENT_PROVIDER_TIMEOUT_SECS`,
    /// `WEBHOOK_ACK_POLICY`, `DUMMY_PAYMENT_SUCCESS_RATE`
    pub fn apply_env_overrides(&mut self) -> ShopResult<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> ShopResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prefix) = lookup("ORDER_NUMBER_PREFIX").filter(|p| !p.trim().is_empty()) {
            self.orders.number_prefix = prefix.trim().to_string();
        }

        if let Some(secs) = lookup("PAYMENT_PROVIDER_TIMEOUT_SECS") {
            self.payments.provider_timeout_secs = secs.trim().parse().map_err(|_| {
                ShopError::Configuration(format!(
                    "PAYMENT_PROVIDER_TIMEOUT_SECS must be a number of seconds, got {}",
                    secs
                ))
            })?;
        }

        if let Some(policy) = lookup("WEBHOOK_ACK_POLICY") {
            self.payments.webhook_ack = policy.parse()?;
        }

        if let Some(rate) = lookup("DUMMY_PAYMENT_SUCCESS_RATE") {
            let rate: i64 = rate.trim().parse().map_err(|_| {
                ShopError::Configuration(format!(
                    "DUMMY_PAYMENT_SUCCESS_RATE must be an integer, got {}",
                    rate
                ))
            })?;
            self.providers
                .entry("dummy".to_string())
                .or_default()
                .insert("success_rate".to_string(), toml::Value::Integer(rate));
        }

        Ok(())
    }
}

impl ProviderConfigSource for ShopConfig {
    fn provider_settings(&self) -> ShopResult<BTreeMap<String, ProviderSettings>> {
        Ok(self.providers.clone())
    }
}

/// Reload source that re-reads the config file and environment each time
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConfigSource;

impl ProviderConfigSource for FileConfigSource {
    fn provider_settings(&self) -> ShopResult<BTreeMap<String, ProviderSettings>> {
        Ok(ShopConfig::load()?.providers)
    }
}
