//! Time-Based One-Time Codes
//!
//! RFC 6238 codes for the second-factor step: HMAC-SHA-1 over a 30-second
//! time counter derived from a base32 shared secret, truncated to six
//! digits. The generator is a pure function of the secret and "now";
//! callers that already have a code from elsewhere skip this entirely.

use std::time::{SystemTime, UNIX_EPOCH};

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

/// Time step in seconds.
const TIME_STEP_SECS: u64 = 30;

/// Number of code digits.
const DIGITS: u32 = 6;

/// Errors from one-time-code generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TotpError {
    /// Shared secret was not valid base32.
    #[error("shared secret is not valid base32")]
    InvalidSecret,
}

/// Current six-digit code for a base32 shared secret.
///
/// # Errors
///
/// Returns [`TotpError::InvalidSecret`] if the secret does not decode as
/// base32.
pub fn totp_now(secret: &str) -> Result<String, TotpError> {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    totp_at(secret, unix)
}

/// Six-digit code for a base32 shared secret at a given unix timestamp.
///
/// # Errors
///
/// Returns [`TotpError::InvalidSecret`] if the secret does not decode as
/// base32.
pub fn totp_at(secret: &str, unix_secs: u64) -> Result<String, TotpError> {
    let key = decode_secret(secret)?;
    let counter = unix_secs / TIME_STEP_SECS;

    let mut mac =
        Hmac::<Sha1>::new_from_slice(&key).map_err(|_| TotpError::InvalidSecret)?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // RFC 4226 dynamic truncation.
    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    let code = binary % 10u32.pow(DIGITS);
    Ok(format!("{code:06}"))
}

/// Decode a base32 secret, tolerating lowercase, spaces, and padding.
fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return Err(TotpError::InvalidSecret);
    }
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| TotpError::InvalidSecret)
}
