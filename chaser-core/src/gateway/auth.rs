//! Private-channel authentication signature
//!
//! The venue authenticates a WS session with an HMAC-SHA256 digest over
//! `"GET/realtime" || expires_ms`, keyed by the API secret and sent as a
//! lowercase hex string.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over the auth payload for the given expiry
pub fn sign(api_secret: &str, expires_ms: i64) -> String {
    let payload = format!("GET/realtime{}", expires_ms);
    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Expiry timestamp for a signature valid for `window_ms` from now
pub fn expires_after(window_ms: u64) -> i64 {
    chrono::Utc::now().timestamp_millis() + window_ms as i64
}
