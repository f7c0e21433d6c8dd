//! Key derivation for state tokens.

use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

/// Secret used when the operator configures none. Tokens sealed with it are
/// forgeable by anyone who reads this source.
pub const DEFAULT_STATE_SECRET: &str = "default-oauth-state-key-change-in-production";

/// A 256-bit AES key for sealing state tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct StateKey([u8; 32]);

impl StateKey {
    /// Derives the key as SHA-256 of the operator secret.
    ///
    /// A missing or blank secret falls back to [`DEFAULT_STATE_SECRET`] and
    /// logs a warning.
    #[must_use]
    pub fn derive(secret: Option<&str>) -> Self {
        let secret = match secret.map(str::trim) {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("state encryption key not configured; using the insecure development default");
                DEFAULT_STATE_SECRET
            }
        };
        Self(Sha256::digest(secret.as_bytes()).into())
    }

    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(
            StateKey::derive(Some("hunter2")),
            StateKey::derive(Some("hunter2"))
        );
        assert_ne!(
            StateKey::derive(Some("hunter2")),
            StateKey::derive(Some("hunter3"))
        );
    }

    #[test]
    fn missing_and_blank_secrets_use_default() {
        let default = StateKey::derive(Some(DEFAULT_STATE_SECRET));
        assert_eq!(StateKey::derive(None), default);
        assert_eq!(StateKey::derive(Some("   ")), default);
    }

    #[test]
    fn debug_does_not_leak_key_material() {
        let key = StateKey::from_bytes([0xAB; 32]);
        let debug = format!("{key:?}");
        assert!(!debug.contains("171"));
        assert!(debug.contains("redacted"));
    }
}
