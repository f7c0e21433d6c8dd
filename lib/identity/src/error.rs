//! Error types for the identity crate.
//!
//! Errors are split by how the login flow should react to them:
//! recoverable failures restart the flow (within the retry budget), the
//! rest are surfaced to the caller.

use std::fmt;

/// Errors from discovery, token verification and the login flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The `state` parameter was missing its seal, stale, or forged.
    InvalidState,
    /// A required callback parameter was absent or empty.
    MissingInput { field: String },
    /// The ID token failed signature, issuer, audience, expiry or nonce
    /// checks, or lacked a required claim.
    TokenValidationFailed { reason: String },
    /// The provider refused the authorization code.
    CodeRejected { reason: String },
    /// The provider could not be reached or answered with garbage.
    UpstreamProviderFailure { reason: String },
    /// The flow failed after the maximum number of restarts.
    RetriesExhausted { attempts: u32 },
    /// Static configuration is unusable.
    Configuration { reason: String },
}

impl AuthError {
    /// Returns true if restarting the login flow could plausibly succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidState | Self::TokenValidationFailed { .. } | Self::CodeRejected { .. }
        )
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState => {
                write!(f, "invalid or expired state parameter")
            }
            Self::MissingInput { field } => {
                write!(f, "missing required parameter: {field}")
            }
            Self::TokenValidationFailed { reason } => {
                write!(f, "ID token validation failed: {reason}")
            }
            Self::CodeRejected { reason } => {
                write!(f, "authorization code rejected: {reason}")
            }
            Self::UpstreamProviderFailure { reason } => {
                write!(f, "identity provider failure: {reason}")
            }
            Self::RetriesExhausted { attempts } => {
                write!(f, "authentication failed after {attempts} attempts")
            }
            Self::Configuration { reason } => {
                write!(f, "identity configuration error: {reason}")
            }
        }
    }
}

impl std::error::Error for AuthError {}
