//! State token configuration.

use serde::{Deserialize, Serialize};

use crate::StateKey;

/// Configuration for sealing state tokens.
///
/// Loaded from environment variables such as `STATE__ENCRYPTION_KEY`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Operator secret the AES key is derived from.
    #[serde(default)]
    encryption_key: Option<String>,
}

impl StateConfig {
    /// Creates a configuration with the given secret.
    #[must_use]
    pub fn new(encryption_key: Option<String>) -> Self {
        Self { encryption_key }
    }

    /// Derives the sealing key from this configuration.
    #[must_use]
    pub fn key(&self) -> StateKey {
        StateKey::derive(self.encryption_key.as_deref())
    }
}
