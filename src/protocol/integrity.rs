//! HMAC-SHA256 integrity check for reassembled messages.
//!
//! The device signs each telemetry message with a pre-shared key and ships
//! the 32-byte digest little-endian, split across the two fragments.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::SecretKey;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// Compute the HMAC-SHA256 of `message` as lower-case hex.
///
/// # Example
///
/// ```
/// use capsync_ble::{protocol::compute_hmac, SecretKey};
///
/// let key = SecretKey::new(b"key".to_vec());
/// let digest = compute_hmac(&key, b"The quick brown fox jumps over the lazy dog").unwrap();
/// assert_eq!(
///     digest,
///     "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
/// );
/// ```
pub fn compute_hmac(key: &SecretKey, message: &[u8]) -> Result<String> {
    let mut mac = new_mac(key)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex-encoded message against a hex-encoded big-endian digest.
///
/// Returns the computed digest alongside the result. A digest that is not
/// valid hex never verifies. The comparison runs in constant time.
pub fn verify_hmac(key: &SecretKey, message_hex: &str, expected_hex: &str) -> Result<(bool, String)> {
    let message = hex::decode(message_hex)
        .map_err(|_| Error::invalid_data(format!("message is not hex: {:?}", message_hex)))?;

    let mut mac = new_mac(key)?;
    mac.update(&message);
    let computed = hex::encode(mac.clone().finalize().into_bytes());

    let verified = match hex::decode(expected_hex) {
        Ok(expected) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    };

    Ok((verified, computed))
}

fn new_mac(key: &SecretKey) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Internal(format!("HMAC key rejected: {}", e)))
}
