//! HMAC-SHA256 request signing, grounded on the teacher's
//! `infrastructure/binance/execution.rs::sign_request`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs `query_string` (the already-urlencoded param string, including
/// `timestamp` and `recvWindow`) with `api_secret`, returning the lowercase
/// hex signature to append as the `signature` query parameter.
pub fn sign(api_secret: &str, query_string: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(api_secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(query_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_the_same_inputs() {
        let a = sign("secret", "symbol=BTCUSDT&side=BUY&timestamp=1000");
        let b = sign("secret", "symbol=BTCUSDT&side=BUY&timestamp=1000");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn signature_changes_with_the_query_string() {
        let a = sign("secret", "timestamp=1000");
        let b = sign("secret", "timestamp=1001");
        assert_ne!(a, b);
    }
}
