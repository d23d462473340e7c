//! Cryptographic utilities for webhook verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `message` and return it hex-encoded (64 characters).
///
/// Returns `None` only if the MAC rejects the key, which HMAC never does.
#[must_use]
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
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

/// Check a hex HMAC-SHA256 signature of `body`.
///
/// Accepts an optional `sha256=` prefix and either hex case.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

    hmac_sha256_hex(secret.as_bytes(), body)
        .is_some_and(|expected| constant_time_eq(&expected, &provided.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_matches_known_vector() {
        // RFC 4231 test case 2.
        let result = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            result,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn constant_time_eq_compares_content_and_length() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }

    #[test]
    fn verify_signature_accepts_prefix_and_uppercase() {
        let body = br#"{"type":"order.paid"}"#;
        let signature = hmac_sha256_hex(b"whsec", body).unwrap();

        assert!(verify_signature("whsec", body, &signature));
        assert!(verify_signature("whsec", body, &format!("sha256={signature}")));
        assert!(verify_signature("whsec", body, &signature.to_uppercase()));
        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("whsec", b"{}", &signature));
    }
}
