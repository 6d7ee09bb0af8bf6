//! Trigger webhook signature verification.
//!
//! The change feed signs every user-update trigger with HMAC-SHA256 over
//! `timestamp + "." + body`, sent as:
//! - `X-Trigger-Timestamp`: Unix epoch seconds when the trigger was sent
//! - `X-Trigger-Signature`: hex digest of the HMAC

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "X-Trigger-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Trigger-Signature";

/// Verify a trigger signature.
///
/// # Arguments
///
/// * `signing_key` - Shared trigger signing key
/// * `timestamp` - The `X-Trigger-Timestamp` header
/// * `body` - The raw request body
/// * `signature` - The `X-Trigger-Signature` header
/// * `max_age_seconds` - Maximum allowed clock difference (prevents replay attacks)
///
/// # Returns
///
/// `true` if the signature is valid and not stale, `false` otherwise.
pub fn verify_trigger_signature(
    signing_key: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    max_age_seconds: u64,
) -> bool {
    if signing_key.is_empty() || timestamp.is_empty() || signature.is_empty() {
        warn!(
            has_signing_key = !signing_key.is_empty(),
            has_timestamp = !timestamp.is_empty(),
            has_signature = !signature.is_empty(),
            "trigger_signature_missing_fields"
        );
        return false;
    }

    let sent_at: u64 = match timestamp.parse() {
        Ok(t) => t,
        Err(_) => {
            warn!(timestamp = %timestamp, "trigger_signature_invalid_timestamp");
            return false;
        }
    };

    let current_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let age = current_time.abs_diff(sent_at);

    if age > max_age_seconds {
        warn!(
            sent_at = sent_at,
            current_time = current_time,
            age_seconds = age,
            max_age_seconds = max_age_seconds,
            "trigger_signature_stale"
        );
        return false;
    }

    let expected_signature = match compute_signature(signing_key, timestamp, body) {
        Some(s) => s,
        None => {
            warn!("trigger_signature_invalid_key");
            return false;
        }
    };

    let valid = constant_time_compare(&expected_signature, &signature.to_ascii_lowercase());

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            "trigger_signature_mismatch"
        );
    }

    valid
}

/// Hex HMAC-SHA256 of `timestamp + "." + body`.
pub fn compute_signature(signing_key: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check if trigger signature verification is enabled.
pub fn is_signature_verification_enabled(signing_key: &Option<String>) -> bool {
    signing_key
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string()
    }

    #[test]
    fn test_verify_signature_missing_fields() {
        assert!(!verify_trigger_signature("", "123", b"{}", "sig", 300));
        assert!(!verify_trigger_signature("key", "", b"{}", "sig", 300));
        assert!(!verify_trigger_signature("key", "123", b"{}", "", 300));
    }

    #[test]
    fn test_verify_signature_invalid_timestamp() {
        assert!(!verify_trigger_signature("key", "yesterday", b"{}", "sig", 300));
    }

    #[test]
    fn test_verify_signature_stale() {
        let signature = compute_signature("key", "946684800", b"{}").unwrap();
        assert!(!verify_trigger_signature("key", "946684800", b"{}", &signature, 300));
    }

    #[test]
    fn test_verify_signature_valid() {
        let timestamp = now();
        let body = br#"{"before":{},"after":{}}"#;
        let signature = compute_signature("test-signing-key", &timestamp, body).unwrap();

        assert!(verify_trigger_signature(
            "test-signing-key",
            &timestamp,
            body,
            &signature,
            300
        ));
        assert!(verify_trigger_signature(
            "test-signing-key",
            &timestamp,
            body,
            &signature.to_uppercase(),
            300
        ));
    }

    #[test]
    fn test_verify_signature_tampered_body() {
        let timestamp = now();
        let signature = compute_signature("key", &timestamp, b"original").unwrap();
        assert!(!verify_trigger_signature("key", &timestamp, b"tampered", &signature, 300));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_is_signature_verification_enabled() {
        assert!(!is_signature_verification_enabled(&None));
        assert!(!is_signature_verification_enabled(&Some("".to_string())));
        assert!(!is_signature_verification_enabled(&Some("   ".to_string())));
        assert!(is_signature_verification_enabled(&Some("key123".to_string())));
    }
}
