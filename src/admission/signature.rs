//! HMAC-SHA256 request signature verification
//!
//! Signatures are the bare lower-case `hex(HMAC-SHA256(body, secret))` and
//! must match byte for byte. With replay protection on, the signed message
//! becomes `"{timestamp}.{nonce}.{body}"` and both headers are mandatory.

use super::idempotency::IdempotencyFilter;
use super::Rejection;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-sentinel-signature";
pub const TIMESTAMP_HEADER: &str = "x-sentinel-timestamp";
pub const NONCE_HEADER: &str = "x-sentinel-nonce";

/// Default accepted clock skew for signed timestamps
pub const DEFAULT_MAX_SKEW: Duration = Duration::from_secs(300);

/// Compute the lower-case hex HMAC-SHA256 of `body`
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify `provided` against the HMAC of `body`
///
/// The comparison is exact: no prefix, whitespace, or case folding. An
/// empty secret accepts everything; callers must only reach that path
/// through an explicit disabled mode.
#[must_use]
pub fn verify_signature(body: &[u8], provided: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let expected = sign(body, secret);
    if expected.is_empty() {
        return false;
    }

    // Slices of unequal length compare false
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Message covered by the signature when replay protection is on
pub fn replay_message(timestamp: &str, nonce: &str, body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(timestamp.len() + nonce.len() + body.len() + 2);
    message.extend_from_slice(timestamp.as_bytes());
    message.push(b'.');
    message.extend_from_slice(nonce.as_bytes());
    message.push(b'.');
    message.extend_from_slice(body);
    message
}

/// Largest skew window a replay guard will honour (one day)
pub const MAX_SKEW_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Replay protection parameters
pub struct ReplayGuard {
    pub max_skew: Duration,
    pub nonces: IdempotencyFilter,
}

impl ReplayGuard {
    /// Nonces are remembered for the full width of the skew window
    ///
    /// `max_skew` is clamped to `MAX_SKEW_LIMIT`.
    pub fn new(max_skew: Duration) -> Self {
        let max_skew = max_skew.min(MAX_SKEW_LIMIT);
        Self {
            max_skew,
            nonces: IdempotencyFilter::new(max_skew.saturating_mul(2)),
        }
    }
}

/// Signature enforcement state
///
/// `Disabled` is an explicit operating mode for trusted internal callers,
/// never the result of a missing secret.
pub enum SignatureMode {
    Disabled,
    Enforced {
        secret: String,
        replay: Option<ReplayGuard>,
    },
}

/// Signature headers extracted from a request
#[derive(Debug, Default, Clone)]
pub struct SignatureHeaders<'a> {
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub nonce: Option<&'a str>,
}

pub struct SignatureValidator {
    mode: SignatureMode,
}

impl SignatureValidator {
    pub fn new(mode: SignatureMode) -> Self {
        if matches!(mode, SignatureMode::Disabled) {
            tracing::warn!("Webhook signature verification DISABLED");
        }
        Self { mode }
    }

    pub fn disabled() -> Self {
        Self::new(SignatureMode::Disabled)
    }

    pub fn enforced(secret: impl Into<String>) -> Self {
        Self::new(SignatureMode::Enforced {
            secret: secret.into(),
            replay: None,
        })
    }

    pub fn with_replay_protection(secret: impl Into<String>, max_skew: Duration) -> Self {
        Self::new(SignatureMode::Enforced {
            secret: secret.into(),
            replay: Some(ReplayGuard::new(max_skew)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, SignatureMode::Enforced { .. })
    }

    /// Nonce cache, when replay protection is on
    pub fn nonce_cache(&self) -> Option<&IdempotencyFilter> {
        match &self.mode {
            SignatureMode::Enforced {
                replay: Some(guard),
                ..
            } => Some(&guard.nonces),
            _ => None,
        }
    }

    /// Check a buffered body against the request's signature headers
    pub fn check(&self, body: &[u8], headers: &SignatureHeaders<'_>) -> Result<(), Rejection> {
        self.check_at(body, headers, Utc::now())
    }

    pub fn check_at(
        &self,
        body: &[u8],
        headers: &SignatureHeaders<'_>,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let (secret, replay) = match &self.mode {
            SignatureMode::Disabled => return Ok(()),
            SignatureMode::Enforced { secret, replay } => (secret, replay),
        };

        let signature = headers
            .signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(Rejection::MissingSignature)?;

        let Some(guard) = replay else {
            return if verify_signature(body, signature, secret) {
                Ok(())
            } else {
                Err(Rejection::InvalidSignature)
            };
        };

        let (Some(timestamp), Some(nonce)) = (
            headers.timestamp.filter(|t| !t.is_empty()),
            headers.nonce.filter(|n| !n.is_empty()),
        ) else {
            return Err(Rejection::MissingSignature);
        };

        let issued = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| Rejection::StaleTimestamp)?
            .with_timezone(&Utc);
        let skew_ms = u128::from((now - issued).num_milliseconds().unsigned_abs());
        if skew_ms > guard.max_skew.as_millis() {
            return Err(Rejection::StaleTimestamp);
        }

        if !verify_signature(&replay_message(timestamp, nonce, body), signature, secret) {
            return Err(Rejection::InvalidSignature);
        }

        // Record the nonce only once the signature holds, so forged
        // requests cannot burn a legitimate sender's nonce.
        if guard.nonces.seen(nonce) {
            return Err(Rejection::ReplayedNonce);
        }

        Ok(())
    }
}
