//! Webhook signature verification.
//!
//! The gateway signs each delivery with HMAC-SHA256 over
//! `"{timestamp}.{raw_body}"` and sends the result in a
//! `Stripe-Signature` header shaped like `t=<unix>,v1=<hex>`. Verification
//! is fail-closed: any parse failure, stale timestamp, or digest mismatch
//! rejects the delivery.

use crate::errors::ServiceError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, PartialEq)]
struct SignatureHeader {
    timestamp: i64,
    signature: Vec<u8>,
}

fn parse_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signature = hex::decode(value).ok(),
            // Ignore unknown schemes (v0 etc).
            _ => {}
        }
    }
    Some(SignatureHeader {
        timestamp: timestamp?,
        signature: signature?,
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verifies a webhook delivery against the shared secret. `now` is passed
/// in so tests can pin the clock.
pub fn verify(
    secret: &str,
    header: &str,
    payload: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> Result<(), ServiceError> {
    let parsed = parse_header(header).ok_or(ServiceError::InvalidSignature)?;

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(ServiceError::InvalidSignature);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InvalidSignature)?;
    mac.update(parsed.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    if constant_time_eq(&expected, &parsed.signature) {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature)
    }
}

/// Produces a valid header for a payload. Used by tests and local tooling.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    format!("t={},v1={}", timestamp, hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret_0123456789";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = sign(SECRET, body, NOW);
        assert!(verify(SECRET, &header, body, 300, NOW).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign(SECRET, b"original", NOW);
        assert!(verify(SECRET, &header, b"tampered", 300, NOW).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign("whsec_other_secret_9876543210", b"payload", NOW);
        assert!(verify(SECRET, &header, b"payload", 300, NOW).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign(SECRET, b"payload", NOW - 301);
        assert!(verify(SECRET, &header, b"payload", 300, NOW).is_err());
        let header = sign(SECRET, b"payload", NOW - 299);
        assert!(verify(SECRET, &header, b"payload", 300, NOW).is_ok());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(verify(SECRET, "garbage", b"payload", 300, NOW).is_err());
        assert!(verify(SECRET, "t=notanumber,v1=00", b"payload", 300, NOW).is_err());
        assert!(verify(SECRET, "t=123", b"payload", 300, NOW).is_err());
    }

    #[test]
    fn ignores_unknown_schemes() {
        let header = sign(SECRET, b"payload", NOW);
        let header = format!("{},v0=deadbeef", header);
        assert!(verify(SECRET, &header, b"payload", 300, NOW).is_ok());
    }
}
