//! # Money
//!
//! Currency codes and exact decimal helpers. Amounts are `rust_decimal::Decimal`
//! in major units everywhere; providers that want minor-unit integers convert at
//! their boundary through [`Currency::to_minor_units`].

use crate::error::{ShopError, ShopResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported currencies (ISO 4217)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    EUR,
    USD,
    GBP,
    JPY,
    CAD,
    AUD,
    CHF,
    MXN,
}

impl Currency {
    /// Returns the ISO 4217 currency code
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::EUR => "EUR",
            Currency::USD => "USD",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::CHF => "CHF",
            Currency::MXN => "MXN",
        }
    }

    /// Returns the number of decimal places for this currency
    /// (JPY has 0 decimals, most others have 2)
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Round an amount to this currency's precision (banker's rounding).
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimal_places(), RoundingStrategy::MidpointNearestEven)
    }

    /// Convert a decimal amount to the smallest currency unit (cents, etc.)
    pub fn to_minor_units(&self, amount: Decimal) -> ShopResult<i64> {
        let scaled = self.round(amount) * Decimal::from(10_i64.pow(self.decimal_places()));
        scaled.to_i64().ok_or_else(|| {
            ShopError::Validation(format!("Amount {} out of range for {}", amount, self))
        })
    }

    /// Convert from smallest unit back to decimal
    pub fn from_minor_units(&self, amount: i64) -> Decimal {
        Decimal::new(amount, self.decimal_places())
    }
}

impl FromStr for Currency {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "EUR" => Ok(Currency::EUR),
            "USD" => Ok(Currency::USD),
            "GBP" => Ok(Currency::GBP),
            "JPY" => Ok(Currency::JPY),
            "CAD" => Ok(Currency::CAD),
            "AUD" => Ok(Currency::AUD),
            "CHF" => Ok(Currency::CHF),
            "MXN" => Ok(Currency::MXN),
            other => Err(ShopError::Validation(format!("Unsupported currency: {}", other))),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format an amount for display (e.g., "36.20 EUR")
pub fn display_amount(amount: Decimal, currency: Currency) -> String {
    format!(
        "{:.*} {}",
        currency.decimal_places() as usize,
        currency.round(amount),
        currency
    )
}
