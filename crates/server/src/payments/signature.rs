//! Webhook signature verification.
//!
//! The provider signs `"{timestamp}.{raw body}"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<unix seconds>,v1=<hex digest>[,v1=...]`. Timestamps
//! outside the tolerance window are rejected so captured payloads cannot be
//! replayed later.

use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Errors from signature verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header: {0}")]
    Malformed(&'static str),
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies webhook signatures with the shared signing secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    #[must_use]
    pub const fn new(secret: SecretString, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    /// Verify `header` against `payload` at the current time.
    ///
    /// # Errors
    ///
    /// Returns a [`SignatureError`] if the header is missing, malformed,
    /// outside the tolerance window or does not match.
    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verify `header` against `payload` as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// See [`WebhookVerifier::verify`].
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<(), SignatureError> {
        let header = header
            .filter(|h| !h.trim().is_empty())
            .ok_or(SignatureError::Missing)?;
        let parsed = parse_header(header)?;

        if now.abs_diff(parsed.timestamp) > self.tolerance.as_secs() {
            return Err(SignatureError::Expired);
        }

        let expected = sign(self.secret.expose_secret(), parsed.timestamp, payload);
        if parsed
            .signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

struct ParsedHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<ParsedHeader<'_>, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(SignatureError::Malformed("expected key=value pairs"));
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::Malformed("invalid timestamp"))?,
                );
            }
            "v1" => signatures.push(value),
            // Other schemes (e.g. v0 test signatures) are ignored.
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed("missing v1 signature"));
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Build the signature header the provider would send for `payload`.
#[must_use]
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!("t={timestamp},v1={}", sign(secret, timestamp, payload))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
