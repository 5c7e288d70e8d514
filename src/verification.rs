use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Result of checking a delivery's signature against the configured secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// No secret configured, so nothing could be checked.
    NotConfigured,
    /// A signature was sent but there is no secret to check it with.
    Unverified { signature: String },
    Valid,
    /// Digest mismatch. Both sides are kept so the operator can compare them.
    Invalid { expected: String, received: String },
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }
}

/// Hex-encoded HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex HMAC-SHA256 signature computed over the raw body.
///
/// An empty secret means verification is not configured, whatever the
/// signature says. The digest comparison is constant-time.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> Verification {
    if secret.is_empty() {
        return Verification::NotConfigured;
    }

    let expected = sign(secret, body);
    if bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
        Verification::Valid
    } else {
        Verification::Invalid {
            expected,
            received: signature.to_string(),
        }
    }
}

/// What the listener shows for a delivery's signature.
///
/// Returns `None` when the delivery carried no signature at all.
pub fn inspect(secret: &str, body: &[u8], signature: &str) -> Option<Verification> {
    if signature.is_empty() {
        return None;
    }
    if secret.is_empty() {
        return Some(Verification::Unverified {
            signature: signature.to_string(),
        });
    }
    Some(verify(secret, body, signature))
}
