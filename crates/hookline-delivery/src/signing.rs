//! HMAC-SHA256 request signing.
//!
//! Recipients holding the shared secret recompute the MAC over the raw body
//! and compare it with the `X-Signature` header to authenticate a delivery.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded body signature (`X-Signature`).
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Signing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// The secret cannot key an HMAC.
    #[error("invalid signing secret")]
    InvalidSecret,
}

/// Computes `hex(HMAC-SHA256(body, secret))`.
///
/// Deterministic: the same body and secret always produce the same
/// lowercase hex string.
///
/// # Example
///
/// ```
/// use hookline_delivery::signing::sign_payload;
///
/// let signature = sign_payload(br#"{"id":1}"#, "secret").unwrap();
/// assert_eq!(signature.len(), 64);
/// ```
///
/// # Errors
///
/// Returns `SigningError::InvalidSecret` if the secret cannot be used as an
/// HMAC key.
pub fn sign_payload(body: &[u8], secret: &str) -> Result<String, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SigningError::InvalidSecret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex signature against the body in constant time.
pub fn verify_signature(body: &[u8], secret: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
