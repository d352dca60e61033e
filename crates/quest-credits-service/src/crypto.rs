//! Webhook signature verification.
//!
//! Stripe signs each delivery with a header of the form
//! `t=<unix timestamp>,v1=<hex hmac>[,v1=<hex hmac>...]`, where each `v1` is
//! HMAC-SHA256 over `"{t}.{raw body}"` keyed with the endpoint's signing secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Why a webhook signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The header has no `t=` component.
    #[error("signature header is missing a timestamp")]
    MissingTimestamp,

    /// The header has no `v1=` component.
    #[error("signature header has no v1 signatures")]
    MissingSignature,

    /// No `v1` signature matched the payload.
    #[error("signature mismatch")]
    Mismatch,

    /// The signing secret could not be used as an HMAC key.
    #[error("invalid signing secret")]
    InvalidSecret,
}

/// Compute HMAC-SHA256 and return the hex-encoded result (64 characters).
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the key is rejected.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// # Errors
///
/// Returns a `SignatureError` describing why the header was rejected.
pub fn verify_stripe_signature(
    secret: &str,
    payload: &str,
    header: &str,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))?;

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `Stripe-Signature` header for a payload. Used to sign test deliveries.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the key is rejected.
pub fn sign_stripe_payload(
    secret: &str,
    timestamp: i64,
    payload: &str,
) -> Result<String, SignatureError> {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))?;
    Ok(format!("t={timestamp},v1={signature}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn hmac_sha256_produces_correct_length() {
        let result =
            hmac_sha256_hex("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(result.len(), 64);
    }

    #[test]
    fn hmac_sha256_known_vector() {
        assert_eq!(
            hmac_sha256_hex("key", "The quick brown fox jumps over the lazy dog").unwrap(),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn constant_time_eq_compares_exactly() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("abc", "ABC"));
    }

    #[test]
    fn signed_payload_verifies() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign_stripe_payload(SECRET, 1_700_000_000, payload).unwrap();
        assert_eq!(verify_stripe_signature(SECRET, payload, &header), Ok(()));
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let payload = r#"{"id":"evt_2"}"#;
        let good = sign_stripe_payload(SECRET, 42, payload).unwrap();
        let header = format!("t=42,v1=deadbeef,{}", good.trim_start_matches("t=42,"));
        assert_eq!(verify_stripe_signature(SECRET, payload, &header), Ok(()));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign_stripe_payload(SECRET, 42, r#"{"credits":5}"#).unwrap();
        assert_eq!(
            verify_stripe_signature(SECRET, r#"{"credits":500}"#, &header),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign_stripe_payload("whsec_other", 42, "{}").unwrap();
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", &header),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", "v1=abc"),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", "t=42"),
            Err(SignatureError::MissingSignature)
        );
    }
}
