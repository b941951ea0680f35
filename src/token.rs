//! Token service (§4.B): HMAC-SHA256 issuance and verification of
//! short-lived `(site_id, gtm_id, expiresAt)` bearer tokens.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("secret must not be empty")]
    EmptySecret,
    #[error("ttl must be positive")]
    NonPositiveTtl,
    /// Deliberately opaque — callers and clients must never learn whether a
    /// token failed to parse, had a bad signature, or expired.
    #[error("invalid token")]
    Invalid,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn fingerprint(site_id: &str, gtm_id: &str, expires_at: i64) -> String {
    format!("{site_id}:{gtm_id}:{expires_at}")
}

fn sign(secret: &[u8], message: &str) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().into()
}

/// Issue a token of the form `"<expiresAt>:<hex-hmac>"`.
pub fn generate(
    secret: &[u8],
    site_id: &str,
    gtm_id: &str,
    ttl: Duration,
) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }
    if ttl.is_zero() {
        return Err(TokenError::NonPositiveTtl);
    }

    let expires_at = now_secs() + ttl.as_secs() as i64;
    let sig = sign(secret, &fingerprint(site_id, gtm_id, expires_at));
    Ok(format!("{expires_at}:{}", hex::encode(sig)))
}

/// Verify a token against the expected `(site_id, gtm_id)` binding.
///
/// Signature is checked before expiry, in constant time, regardless of
/// which check ultimately fails — every failure surfaces as the same
/// opaque [`TokenError::Invalid`].
pub fn validate(secret: &[u8], site_id: &str, gtm_id: &str, token: &str) -> Result<(), TokenError> {
    let (expires_str, sig_hex) = token.split_once(':').ok_or(TokenError::Invalid)?;
    let expires_at: i64 = expires_str.parse().map_err(|_| TokenError::Invalid)?;
    let provided_sig = hex::decode(sig_hex).map_err(|_| TokenError::Invalid)?;

    let expected_sig = sign(secret, &fingerprint(site_id, gtm_id, expires_at));
    let sig_ok = expected_sig.ct_eq(provided_sig.as_slice()).into();

    let not_expired = now_secs() <= expires_at;

    if sig_ok && not_expired {
        Ok(())
    } else {
        Err(TokenError::Invalid)
    }
}
