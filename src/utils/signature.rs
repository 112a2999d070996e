use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Checks a Meta `X-Hub-Signature-256` header (`sha256=<hex>`) against the
/// raw request body.
pub fn verify_hub_signature(body: &[u8], header: &str, app_secret: &str) -> bool {
    let Some(provided_hex) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(provided) = hex::decode(provided_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

pub fn sign_hub_body(body: &[u8], app_secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

pub fn secrets_match(provided: &str, expected: &str) -> bool {
    ConstantTimeEq::ct_eq(provided.as_bytes(), expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_own_signature() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        let header = sign_hub_body(body, "app-secret").unwrap();
        assert!(verify_hub_signature(body, &header, "app-secret"));
    }

    #[test]
    fn rejects_tampered_body_and_bad_headers() {
        let header = sign_hub_body(b"original", "app-secret").unwrap();
        assert!(!verify_hub_signature(b"tampered", &header, "app-secret"));
        assert!(!verify_hub_signature(b"original", "sha1=abcd", "app-secret"));
        assert!(!verify_hub_signature(b"original", "sha256=zz", "app-secret"));
    }

    #[test]
    fn secret_comparison() {
        assert!(secrets_match("whsec", "whsec"));
        assert!(!secrets_match("whsec", "whsec2"));
    }
}
