//! Webhook signature verification
//!
//! Keyed SHA-256 over `secret || '.' || body`, hex-encoded. The
//! signature is checked before any byte of the payload is parsed; a
//! mismatch is a security failure, not a parse failure.

use sha2::{Digest, Sha256};

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "x-psp-signature";

/// Compute the hex signature for a payload
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of an expected signature against the one
/// presented by the caller
pub fn verify(secret: &str, body: &[u8], presented: &str) -> bool {
    let expected = sign(secret, body);
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .bytes()
        .zip(presented.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let body = br#"{"trace_id":"T-1"}"#;
        let sig = sign("topsecret", body);
        assert!(verify("topsecret", body, &sig));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let sig = sign("topsecret", body);
        assert!(!verify("other", body, &sig));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = sign("topsecret", b"payload");
        assert!(!verify("topsecret", b"payloaD", &sig));
    }
}
