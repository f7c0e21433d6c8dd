//! Error types for the state crate.

use std::fmt;

/// Errors raised while issuing a state token.
///
/// Validation never surfaces an error to the caller; a bad token is simply
/// not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The payload could not be serialized.
    Encoding { reason: String },
    /// The cipher refused to seal the payload.
    Encryption { reason: String },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding { reason } => {
                write!(f, "failed to encode state payload: {reason}")
            }
            Self::Encryption { reason } => {
                write!(f, "failed to encrypt state payload: {reason}")
            }
        }
    }
}

impl std::error::Error for StateError {}
