//! Temporary cloud credentials for authenticated users.
//!
//! [`CredentialBroker`] turns an identity token into short-lived STS
//! credentials. The role comes from the token (`cognito:preferred_role`,
//! then `cognito:roles`) or from configuration, and results are cached per
//! token fingerprint until they come within the safety buffer of expiry.

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod role;
pub mod session;
pub mod sts;

pub use broker::CredentialBroker;
pub use cache::{
    CacheKey, CachedCredential, CredentialCache, InMemoryCredentialCache, TemporaryCredentials,
};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use role::{authorize_role, select_role};
pub use session::{MAX_SESSION_NAME_LEN, session_name};
pub use sts::{FederationClient, FederationRequest, StsFederationClient};
