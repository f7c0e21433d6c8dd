//! Error types for the broker crate.

use std::fmt;

/// Errors from credential brokering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The identity token was empty or unreadable.
    InvalidInput { reason: String },
    /// Neither the token nor configuration names a role to assume.
    NoResolvableRole,
    /// The selected role is not among the roles the token allows.
    RoleNotPermitted { role: String },
    /// The federation service failed or refused the exchange.
    UpstreamFederationFailure { reason: String },
    /// Static configuration is unusable.
    Configuration { reason: String },
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { reason } => {
                write!(f, "invalid identity token: {reason}")
            }
            Self::NoResolvableRole => {
                write!(f, "no role could be resolved for this identity")
            }
            Self::RoleNotPermitted { role } => {
                write!(f, "role {role} is not permitted for this identity")
            }
            Self::UpstreamFederationFailure { reason } => {
                write!(f, "credential federation failed: {reason}")
            }
            Self::Configuration { reason } => {
                write!(f, "broker configuration error: {reason}")
            }
        }
    }
}

impl std::error::Error for BrokerError {}
