//! The knot request signature scheme:
//! `X-Signature = hex(HMAC-SHA256(secret, METHOD || PATH || X-Timestamp))`
//! with the timestamp in RFC 3339. The knot enforces the replay window; the
//! appview only mints timestamps.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ClientError;

pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Signature";

pub fn signature(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: &str,
) -> Result<String, ClientError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ClientError::Signing(e.to_string()))?;
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(timestamp.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-shape check used when validating a signed response or webhook.
pub fn verify(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: &str,
    presented: &str,
) -> Result<bool, ClientError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ClientError::Signing(e.to_string()))?;
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(timestamp.as_bytes());
    let presented = match hex::decode(presented) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(false),
    };
    Ok(mac.verify_slice(&presented).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector_round_trips() {
        let sig = signature("s3cret", "PUT", "/repo/new", "2026-01-02T03:04:05Z").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(verify("s3cret", "PUT", "/repo/new", "2026-01-02T03:04:05Z", &sig).unwrap());
    }

    #[test]
    fn any_component_change_breaks_the_mac() {
        let ts = "2026-01-02T03:04:05Z";
        let sig = signature("s3cret", "PUT", "/repo/new", ts).unwrap();
        assert!(!verify("s3cret", "POST", "/repo/new", ts, &sig).unwrap());
        assert!(!verify("s3cret", "PUT", "/repo", ts, &sig).unwrap());
        assert!(!verify("s3cret", "PUT", "/repo/new", "2026-01-02T03:04:06Z", &sig).unwrap());
        assert!(!verify("other", "PUT", "/repo/new", ts, &sig).unwrap());
    }

    #[test]
    fn garbage_hex_is_rejected_not_an_error() {
        assert!(!verify("s", "GET", "/", "t", "not-hex").unwrap());
    }

    #[test]
    fn signature_is_deterministic() {
        let a = signature("k", "GET", "/capabilities", "2026-01-01T00:00:00Z").unwrap();
        let b = signature("k", "GET", "/capabilities", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
    }
}
