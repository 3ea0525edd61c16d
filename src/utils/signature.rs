use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock skew tolerated between the sender's timestamp and ours.
pub const REPLAY_WINDOW_SECONDS: i64 = 300;

/// hex(HMAC-SHA256(secret, "{ts}.{body}")), the scheme both inbound
/// webhook endpoints require in `x-signature` / `x-signature-ts` headers.
pub fn sign(secret: &str, ts: i64, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify(secret: &str, ts: i64, body: &[u8], provided: &str, now_unix: i64) -> bool {
    if ts <= 0 || (now_unix - ts).abs() > REPLAY_WINDOW_SECONDS {
        return false;
    }
    let expected = sign(secret, ts, body);
    let provided = provided.strip_prefix("v1=").unwrap_or(provided);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), provided.as_bytes()).unwrap_u8() == 1u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let sig = sign("secret", 1_700_000_000, b"{\"a\":1}");
        assert!(verify("secret", 1_700_000_000, b"{\"a\":1}", &sig, 1_700_000_010));
        assert!(verify(
            "secret",
            1_700_000_000,
            b"{\"a\":1}",
            &format!("v1={sig}"),
            1_700_000_010
        ));
    }

    #[test]
    fn tampered_body_fails() {
        let sig = sign("secret", 1_700_000_000, b"{\"a\":1}");
        assert!(!verify("secret", 1_700_000_000, b"{\"a\":2}", &sig, 1_700_000_010));
    }

    #[test]
    fn stale_timestamp_fails() {
        let sig = sign("secret", 1_700_000_000, b"{}");
        assert!(!verify("secret", 1_700_000_000, b"{}", &sig, 1_700_000_000 + 301));
        assert!(!verify("secret", 0, b"{}", &sig, 1_700_000_000));
    }
}
