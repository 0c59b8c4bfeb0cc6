//! HMAC-SHA256 webhook signatures.
//!
//! Stripe-style scheme: the signed payload is `"{timestamp}.{payload}"`,
//! the signature is hex-encoded and prefixed with a version tag. The
//! verifier enforces a replay window and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature scheme version tag.
const VERSION_PREFIX: &str = "v1=";

/// Maximum clock skew / replay window, in seconds. A timestamp exactly at
/// the boundary is still accepted.
pub const MAX_SKEW_SECS: i64 = 300;

/// Why verification failed. Callers exposed to untrusted peers must flatten
/// every variant to a single opaque rejection — the distinction exists for
/// internal logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("timestamp outside the replay window")]
    StaleTimestamp,
    #[error("unsupported signature version")]
    VersionMismatch,
    #[error("signature mismatch")]
    Mismatch,
}

/// Sign a payload: `v1=<hex HMAC-SHA256 over "{timestamp}.{payload}">`.
pub fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
    let signed_payload = format!("{timestamp}.{payload}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signed_payload.as_bytes());
    format!("{VERSION_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature against the shared secret.
///
/// Rejects when `|now - timestamp| > MAX_SKEW_SECS`, when the version tag
/// is missing or unknown, or when the recomputed signature differs. The
/// comparison never short-circuits.
pub fn verify(
    payload: &str,
    signature: &str,
    secret: &str,
    timestamp: i64,
    now: i64,
) -> Result<(), SignatureError> {
    if (now - timestamp).abs() > MAX_SKEW_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    let Some(provided_hex) = signature.strip_prefix(VERSION_PREFIX) else {
        return Err(SignatureError::VersionMismatch);
    };

    let expected = sign(payload, secret, timestamp);
    let expected_hex = &expected[VERSION_PREFIX.len()..];

    if constant_time_eq(provided_hex.as_bytes(), expected_hex.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let sig = sign(r#"{"hello":"world"}"#, "whsec_test", 1_770_000_000);
        assert!(sig.starts_with("v1="));
        assert!(
            verify(
                r#"{"hello":"world"}"#,
                &sig,
                "whsec_test",
                1_770_000_000,
                1_770_000_000
            )
            .is_ok()
        );
    }

    #[test]
    fn test_roundtrip_various_payloads() {
        for payload in ["", "x", r#"{"a":[1,2,3]}"#, "multi\nline\npayload"] {
            let sig = sign(payload, "secret", 42);
            assert!(verify(payload, &sig, "secret", 42, 42).is_ok());
        }
    }

    #[test]
    fn test_skew_boundary() {
        let t = 1_770_000_000;
        let sig = sign("payload", "secret", t);
        // 299s and exactly 300s of skew are accepted; 301s is not.
        assert!(verify("payload", &sig, "secret", t, t + 299).is_ok());
        assert!(verify("payload", &sig, "secret", t, t + 300).is_ok());
        assert_eq!(
            verify("payload", &sig, "secret", t, t + 301),
            Err(SignatureError::StaleTimestamp)
        );
        // Skew applies in both directions (future timestamps too).
        assert_eq!(
            verify("payload", &sig, "secret", t, t - 301),
            Err(SignatureError::StaleTimestamp)
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let t = 1_770_000_000;
        let sig = sign("payload", "secret", t);
        assert_eq!(
            verify("payload2", &sig, "secret", t, t),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let t = 1_770_000_000;
        let sig = sign("payload", "secret", t);
        assert_eq!(
            verify("payload", &sig, "other-secret", t, t),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_version_tag_required() {
        let t = 1_770_000_000;
        let sig = sign("payload", "secret", t);
        let raw_hex = sig.strip_prefix("v1=").unwrap();
        assert_eq!(
            verify("payload", raw_hex, "secret", t, t),
            Err(SignatureError::VersionMismatch)
        );
        assert_eq!(
            verify("payload", &format!("v2={raw_hex}"), "secret", t, t),
            Err(SignatureError::VersionMismatch)
        );
    }

    #[test]
    fn test_timestamp_bound_into_signature() {
        // Replaying the same payload with a shifted timestamp must fail even
        // inside the window.
        let t = 1_770_000_000;
        let sig = sign("payload", "secret", t);
        assert_eq!(
            verify("payload", &sig, "secret", t + 10, t + 10),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
