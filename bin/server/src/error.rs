//! Server startup errors.

use std::fmt;

/// Failures while assembling the application from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// The identity provider settings are unusable.
    Identity { reason: String },
    /// The credential broker settings are unusable.
    Broker { reason: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity { reason } => write!(f, "identity setup failed: {reason}"),
            Self::Broker { reason } => write!(f, "broker setup failed: {reason}"),
        }
    }
}

impl std::error::Error for StartupError {}
