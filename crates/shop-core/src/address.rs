//! # Checkout Input
//!
//! Billing/shipping data arrives as two flat field maps. Format validation
//! belongs to the caller; this module only re-checks the required keys and
//! turns the maps into address snapshots stored on the order.

use crate::error::{ShopError, ShopResult};
use crate::money::Currency;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys every billing and shipping map must carry (non-blank)
pub const REQUIRED_ADDRESS_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "address_line_1",
    "city",
    "state",
    "postal_code",
];

/// Flat address mapping as submitted by a checkout form
pub type AddressFields = BTreeMap<String, String>;

/// Validated checkout data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutData {
    pub billing: AddressFields,
    pub shipping: AddressFields,

    /// Contact email for orders without a registered user
    #[serde(default)]
    pub guest_email: Option<String>,

    #[serde(default)]
    pub notes: String,

    #[serde(default)]
    pub terms_accepted: bool,

    #[serde(default)]
    pub newsletter_signup: bool,

    /// Overrides the configured shop currency
    #[serde(default)]
    pub currency: Option<Currency>,
}

impl CheckoutData {
    /// Report every missing required field at once, prefixed with
    /// `billing_` / `shipping_`.
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        for (prefix, fields) in [("billing", &self.billing), ("shipping", &self.shipping)] {
            for key in REQUIRED_ADDRESS_FIELDS {
                let present = fields.get(*key).map(|v| !v.trim().is_empty()).unwrap_or(false);
                if !present {
                    missing.push(format!("{}_{}", prefix, key));
                }
            }
        }
        missing
    }

    pub fn validate(&self) -> ShopResult<()> {
        let fields = self.missing_fields();
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ShopError::InvalidCheckout { fields })
        }
    }

    /// Normalized guest email (blank counts as absent)
    pub fn guest_email(&self) -> Option<String> {
        self.guest_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }
}

/// Snapshot of a billing or shipping address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub address_line_1: String,
    pub address_line_2: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    /// ISO-3166 alpha-2
    pub country: String,
    pub phone: String,
}

impl Address {
    /// Build an address from a flat field map. Missing optional keys become
    /// empty strings; a missing country takes `default_country`.
    pub fn from_fields(fields: &AddressFields, default_country: &str) -> Self {
        let get = |key: &str| {
            fields
                .get(key)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let country = Some(get("country"))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default_country.to_string())
            .to_uppercase();

        Self {
            first_name: get("first_name"),
            last_name: get("last_name"),
            company: get("company"),
            address_line_1: get("address_line_1"),
            address_line_2: get("address_line_2"),
            city: get("city"),
            state: get("state"),
            postal_code: get("postal_code"),
            country,
            phone: get("phone"),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// Multi-line postal block
    pub fn formatted(&self) -> String {
        let mut lines = vec![self.full_name()];
        if !self.company.is_empty() {
            lines.push(self.company.clone());
        }
        lines.push(self.address_line_1.clone());
        if !self.address_line_2.is_empty() {
            lines.push(self.address_line_2.clone());
        }
        lines.push(format!("{}, {} {}", self.city, self.state, self.postal_code));
        lines.push(self.country.clone());
        lines.join("\n")
    }
}
