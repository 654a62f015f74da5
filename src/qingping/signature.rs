//! Webhook authenticity check.
//!
//! Qingping signs every push with
//! `hex(HMAC-SHA256(app_secret, timestamp + token))` and sends the three values
//! in the `signature` block of the body.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `timestamp + token`.
pub fn expected_signature(secret: &str, timestamp: &str, token: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Returns `true` only if `signature` matches the expected value.
///
/// An unconfigured secret or any empty field yields `false`; this never errors.
pub fn verify(secret: Option<&str>, timestamp: &str, token: &str, signature: &str) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return false;
    };
    if timestamp.is_empty() || token.is_empty() || signature.is_empty() {
        return false;
    }

    let expected = expected_signature(secret, timestamp, token);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}
