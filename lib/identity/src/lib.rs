//! OIDC identity for keyward.
//!
//! This crate provides:
//! - Provider discovery, performed once and shared (`ProviderHandle`)
//! - ID-token verification and claims normalization (`TokenVerifier`, `Principal`)
//! - The authorization-code login flow with bounded retries (`FlowOrchestrator`)
//!
//! # Roles
//!
//! A principal's application role comes from `custom:role`, then the legacy
//! `custom:userRole`, then an optional [`DefaultRolePolicy`], then `"user"`.
//! Federation roles (`cognito:preferred_role`, `cognito:roles`) are carried
//! through untouched for the credential broker.

pub mod claims;
pub mod config;
pub mod error;
pub mod exchange;
pub mod flow;
pub mod principal;
pub mod provider;
pub mod verifier;

pub use claims::{IdentityClaims, LinkedIdentity};
pub use config::{IdentityConfig, IdentityConfigBuilder};
pub use error::AuthError;
pub use exchange::{CodeExchanger, IdTokenFields, OAuthCodeExchanger, TokenSet};
pub use flow::{
    AuthenticatedLogin, CallbackOutcome, CallbackRequest, FlowOrchestrator, FlowState,
    RETRY_QUERY_PARAM, RetryState,
};
pub use principal::{DefaultRolePolicy, FALLBACK_ROLE, Principal};
pub use provider::{MetadataSource, OidcDiscovery, ProviderHandle, ProviderMetadata};
pub use verifier::TokenVerifier;
