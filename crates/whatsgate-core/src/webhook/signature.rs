//! `X-Hub-Signature-256` verification

use hmac::{Hmac, Mac};
use sha2::Sha256;
use whatsgate_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the header value Meta sends for `body`
pub fn sign(app_secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|e| Error::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check `signature` (`sha256=<hex>`) against the HMAC-SHA256 of `body`
pub fn verify(app_secret: &str, body: &[u8], signature: Option<&str>) -> Result<()> {
    let signature = signature.ok_or_else(|| Error::Auth("Missing webhook signature".to_string()))?;
    let digest = signature
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
        .ok_or_else(|| Error::Auth("Malformed webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|e| Error::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    // verify_slice compares in constant time
    mac.verify_slice(&digest)
        .map_err(|_| Error::Auth("Webhook signature mismatch".to_string()))
}

/// Constant-time string equality for shared secrets
pub fn secrets_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_accepts_own_signature() {
        let body = br#"{"object":"whatsapp_business_account","entry":[]}"#;
        let signature = sign("app-secret", body).unwrap();
        assert!(signature.starts_with("sha256="));
        assert!(verify("app-secret", body, Some(&signature)).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signature = sign("app-secret", b"original").unwrap();
        assert!(matches!(
            verify("app-secret", b"tampered", Some(&signature)),
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            verify("other-secret", b"original", Some(&signature)),
            Err(Error::Auth(_))
        ));
        assert!(matches!(verify("app-secret", b"original", None), Err(Error::Auth(_))));
        assert!(matches!(
            verify("app-secret", b"original", Some("sha1=abcd")),
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            verify("app-secret", b"original", Some("sha256=zz")),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn test_secrets_equal() {
        assert!(secrets_equal("token", "token"));
        assert!(!secrets_equal("token", "tokem"));
        assert!(!secrets_equal("token", "token2"));
    }
}
