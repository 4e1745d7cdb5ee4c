//! # Dummy Provider Configuration
//!
//! Read from the `[providers.dummy]` table of `config/shop.toml`.
//! `DUMMY_PAYMENT_SUCCESS_RATE` in the environment overrides `success_rate`
//! (applied by `ShopConfig::load`).

use serde::Deserialize;
use shop_core::{ProviderSettings, ShopError, ShopResult};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawDummyConfig {
    success_rate: i64,
    processing_delay_ms: u64,
    auto_capture: bool,
    test_mode: bool,
    webhook_secret: Option<String>,
}

impl Default for RawDummyConfig {
    fn default() -> Self {
        Self {
            success_rate: 100,
            processing_delay_ms: 0,
            auto_capture: true,
            test_mode: true,
            webhook_secret: None,
        }
    }
}

/// Dummy provider behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DummyConfig {
    /// Percentage of simulated operations that succeed (0..=100)
    pub success_rate: u8,

    /// Artificial latency before every simulated operation
    pub processing_delay: Duration,

    /// `false` makes `start_payment` report `authorized` instead of `success`
    pub auto_capture: bool,

    pub test_mode: bool,

    /// When set, webhooks and return redirects must be signed
    pub webhook_secret: Option<String>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            success_rate: 100,
            processing_delay: Duration::ZERO,
            auto_capture: true,
            test_mode: true,
            webhook_secret: None,
        }
    }
}

impl DummyConfig {
    /// Parse the provider's settings table. Unknown keys are ignored.
    pub fn from_settings(settings: &ProviderSettings) -> ShopResult<Self> {
        let raw: RawDummyConfig = toml::Value::Table(settings.clone())
            .try_into()
            .map_err(|e| ShopError::Configuration(format!("Invalid dummy provider settings: {}", e)))?;

        let success_rate = u8::try_from(raw.success_rate)
            .ok()
            .filter(|rate| *rate <= 100)
            .ok_or_else(|| {
                ShopError::Configuration(format!(
                    "success_rate must be between 0 and 100, got {}",
                    raw.success_rate
                ))
            })?;

        Ok(Self {
            success_rate,
            processing_delay: Duration::from_millis(raw.processing_delay_ms),
            auto_capture: raw.auto_capture,
            test_mode: raw.test_mode,
            webhook_secret: raw.webhook_secret.filter(|s| !s.is_empty()),
        })
    }

    /// Builder: set the success rate (clamped to 100)
    pub fn with_success_rate(mut self, rate: u8) -> Self {
        self.success_rate = rate.min(100);
        self
    }

    /// Builder: require signed webhooks
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Builder: hold funds at initiation and settle on capture
    pub fn with_auto_capture(mut self, auto_capture: bool) -> Self {
        self.auto_capture = auto_capture;
        self
    }

    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }
}
