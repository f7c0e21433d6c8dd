//! Sealing and opening state tokens.
//!
//! Token layout: `base64url(iv || ciphertext || tag)` where `iv` is a fresh
//! 96-bit random value and the plaintext is the JSON-encoded
//! [`StatePayload`]. Tokens are emitted without padding; padded input is
//! accepted too.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, general_purpose};
use keyward_core::{Clock, SystemClock, preview};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{StateError, StateKey};

/// Oldest state token that is still accepted, in seconds.
pub const MAX_STATE_AGE_SECONDS: i64 = 300;

/// How far in the future a token's timestamp may be, in seconds.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 60;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    general_purpose::NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The plaintext sealed inside a state token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    /// Unix seconds at which the token was issued.
    #[serde(rename = "timestamp")]
    pub issued_at: i64,
    /// Where to send the user after login. May be empty.
    pub redirect_url: String,
    /// Nonce bound into the provider's ID token.
    pub nonce: String,
    /// How many times the login has been restarted. Omitted when zero.
    #[serde(default, skip_serializing_if = "is_first_attempt")]
    pub attempt: u32,
}

fn is_first_attempt(attempt: &u32) -> bool {
    *attempt == 0
}

/// Why a token was turned away. Only ever logged.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StateRejection {
    Malformed,
    TooShort { len: usize },
    Tampered,
    UnreadablePayload { reason: String },
    Expired { age: i64 },
    FromFuture { skew: i64 },
}

impl fmt::Display for StateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "not valid base64url"),
            Self::TooShort { len } => write!(f, "only {len} bytes after decoding"),
            Self::Tampered => write!(f, "authentication tag mismatch"),
            Self::UnreadablePayload { reason } => write!(f, "unreadable payload: {reason}"),
            Self::Expired { age } => write!(f, "expired ({age}s old)"),
            Self::FromFuture { skew } => write!(f, "issued {skew}s in the future"),
        }
    }
}

/// Issues and validates encrypted state tokens.
///
/// Holds no per-token state, so any number of server instances sharing the
/// same key can validate each other's tokens.
pub struct StateCodec {
    cipher: Aes256Gcm,
    clock: Arc<dyn Clock>,
}

impl StateCodec {
    /// Creates a codec using the system clock.
    #[must_use]
    pub fn new(key: &StateKey) -> Self {
        Self::with_clock(key, Arc::new(SystemClock))
    }

    /// Creates a codec reading time from `clock`.
    #[must_use]
    pub fn with_clock(key: &StateKey, clock: Arc<dyn Clock>) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self { cipher, clock }
    }

    /// Seals `nonce` and `redirect_url` into a fresh token stamped with the
    /// current time.
    ///
    /// Two calls with identical arguments produce different tokens.
    pub fn issue(&self, nonce: &str, redirect_url: &str) -> Result<String, Report<StateError>> {
        self.issue_for_attempt(nonce, redirect_url, 0)
    }

    /// As [`StateCodec::issue`], also sealing the login attempt number.
    pub fn issue_for_attempt(
        &self,
        nonce: &str,
        redirect_url: &str,
        attempt: u32,
    ) -> Result<String, Report<StateError>> {
        let payload = StatePayload {
            issued_at: self.clock.now().timestamp(),
            redirect_url: redirect_url.to_string(),
            nonce: nonce.to_string(),
            attempt,
        };
        let plaintext = serde_json::to_vec(&payload).map_err(|e| StateError::Encoding {
            reason: e.to_string(),
        })?;

        let iv = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&iv, plaintext.as_slice())
            .map_err(|e| StateError::Encryption {
                reason: e.to_string(),
            })?;

        let mut raw = Vec::with_capacity(IV_LEN + sealed.len());
        raw.extend_from_slice(&iv);
        raw.extend_from_slice(&sealed);

        debug!(nonce = %preview(nonce), attempt, "issued state token");
        Ok(TOKEN_ENGINE.encode(raw))
    }

    /// Opens a token and returns its full payload if it is authentic and
    /// fresh.
    #[must_use]
    pub fn open(&self, token: &str) -> Option<StatePayload> {
        match self.decode(token) {
            Ok(payload) => {
                debug!(
                    token = %preview(token),
                    age = self.clock.now().timestamp() - payload.issued_at,
                    "state token accepted"
                );
                Some(payload)
            }
            Err(rejection) => {
                warn!(token = %preview(token), reason = %rejection, "state token rejected");
                None
            }
        }
    }

    /// Validates a token and returns the redirect target it carries.
    ///
    /// `None` covers every failure: bad encoding, truncation, tampering,
    /// a wrong key, an unreadable payload, expiry and future timestamps.
    #[must_use]
    pub fn validate(&self, token: &str) -> Option<String> {
        self.open(token).map(|payload| payload.redirect_url)
    }

    /// Returns the attempt number sealed in an authentic token, ignoring
    /// its age. A stale token still says which attempt it belonged to.
    #[must_use]
    pub fn sealed_attempt(&self, token: &str) -> Option<u32> {
        self.unseal(token).ok().map(|payload| payload.attempt)
    }

    fn decode(&self, token: &str) -> Result<StatePayload, StateRejection> {
        let payload = self.unseal(token)?;

        let now = self.clock.now().timestamp();
        let age = now - payload.issued_at;
        if age > MAX_STATE_AGE_SECONDS {
            return Err(StateRejection::Expired { age });
        }
        if payload.issued_at > now + MAX_CLOCK_SKEW_SECONDS {
            return Err(StateRejection::FromFuture { skew: -age });
        }

        Ok(payload)
    }

    fn unseal(&self, token: &str) -> Result<StatePayload, StateRejection> {
        let raw = TOKEN_ENGINE
            .decode(token.trim())
            .map_err(|_| StateRejection::Malformed)?;
        if raw.len() < IV_LEN + TAG_LEN {
            return Err(StateRejection::TooShort { len: raw.len() });
        }

        let (iv, sealed) = raw.split_at(IV_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(iv), sealed)
            .map_err(|_| StateRejection::Tampered)?;

        serde_json::from_slice(&plaintext).map_err(|e| StateRejection::UnreadablePayload {
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCodec")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
