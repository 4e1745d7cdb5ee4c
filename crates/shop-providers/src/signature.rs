//! # Webhook Signatures
//!
//! HMAC-SHA256 signing shared by the built-in providers.
//!
//! Server pushes carry a header of the form `t=<unix>,v1=<hex>` where the
//! signature covers `"{t}.{body}"`. Return redirects carry a `signature`
//! query parameter over `"{payment_id}.{status}.{order_id}"`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use shop_core::{ShopError, ShopResult};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the push signature (stored lowercase)
pub const SIGNATURE_HEADER: &str = "x-dummy-signature";

/// Maximum clock skew accepted for a signed push
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> ShopResult<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            ShopError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
        })?;

        if signatures.is_empty() {
            return Err(ShopError::WebhookVerificationFailed(
                "No v1 signature found".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn mac(secret: &str) -> ShopResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ShopError::Configuration(format!("Invalid webhook secret: {}", e)))
}

/// Hex HMAC-SHA256 of `parts` joined with `.`
pub fn compute_signature(secret: &str, parts: &[&[u8]]) -> ShopResult<String> {
    let mut mac = mac(secret)?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            mac.update(b".");
        }
        mac.update(part);
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Header value for a push body signed at `timestamp`
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> ShopResult<String> {
    let ts = timestamp.to_string();
    let signature = compute_signature(secret, &[ts.as_bytes(), body])?;
    Ok(format!("t={},v1={}", timestamp, signature))
}

/// Check a push signature header against `body` at time `now`
pub fn verify_payload(
    secret: &str,
    header: &str,
    body: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> ShopResult<()> {
    let parsed = SignatureHeader::parse(header)?;

    if now.abs_diff(parsed.timestamp) > tolerance_secs.unsigned_abs() {
        return Err(ShopError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let ts = parsed.timestamp.to_string();
    let expected = compute_signature(secret, &[ts.as_bytes(), body])?;
    if parsed
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected))
    {
        Ok(())
    } else {
        Err(ShopError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ))
    }
}

/// Signature for the query string of a return redirect
pub fn sign_return(secret: &str, payment_id: &str, status: &str, order_id: &str) -> ShopResult<String> {
    compute_signature(
        secret,
        &[payment_id.as_bytes(), status.as_bytes(), order_id.as_bytes()],
    )
}

pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_parse_signature_header() {
        let parsed = SignatureHeader::parse("t=1234567890,v1=abc123,v1=def456").unwrap();

        assert_eq!(parsed.timestamp, 1234567890);
        assert_eq!(parsed.signatures, vec!["abc123", "def456"]);

        assert!(SignatureHeader::parse("v1=abc").is_err());
        assert!(SignatureHeader::parse("t=12").is_err());
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let sig = compute_signature(SECRET, &[b"1234567890".as_slice(), b"{}".as_slice()]).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signed_payload_verifies() {
        let body = br#"{"status":"completed"}"#;
        let header = sign_payload(SECRET, 1_700_000_000, body).unwrap();

        assert!(verify_payload(SECRET, &header, body, 1_700_000_100, DEFAULT_TOLERANCE_SECS).is_ok());
        assert!(verify_payload("other", &header, body, 1_700_000_100, DEFAULT_TOLERANCE_SECS).is_err());
        assert!(verify_payload(SECRET, &header, b"{}", 1_700_000_100, DEFAULT_TOLERANCE_SECS).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let body = b"{}";
        let header = sign_payload(SECRET, 1_700_000_000, body).unwrap();

        let err = verify_payload(SECRET, &header, body, 1_700_000_301, DEFAULT_TOLERANCE_SECS)
            .unwrap_err();
        assert!(err.to_string().contains("tolerance"));
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        for header in ["t=-9223372036854775808,v1=00", "t=9223372036854775807,v1=00"] {
            let err = verify_payload("whsec", header, b"{}", 1_700_000_000, 300).unwrap_err();
            assert!(err.to_string().contains("tolerance"));
        }
    }

    #[test]
    fn test_return_signature_depends_on_every_field() {
        let base = sign_return(SECRET, "dummy_1", "success", "42").unwrap();
        assert_eq!(base, sign_return(SECRET, "dummy_1", "success", "42").unwrap());
        assert_ne!(base, sign_return(SECRET, "dummy_1", "failed", "42").unwrap());
        assert_ne!(base, sign_return(SECRET, "dummy_1", "success", "43").unwrap());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc123", "abc123"));
        assert!(!constant_time_compare("abc123", "abc124"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
