//! Request authentication: IP allowlist and HMAC-SHA256 signatures.

use std::net::IpAddr;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// An empty allowlist admits every address.
pub fn ip_allowed(allowed: &[IpAddr], remote: IpAddr) -> bool {
    allowed.is_empty() || allowed.contains(&remote)
}

/// Verify `X-Signature: sha256=<hex>` over the raw request body.
///
/// Comparison is constant-time via the MAC verification itself.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header else {
        return false;
    };
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Compute the signature header value for a body. Used by tests and by
/// operators to produce valid requests.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
