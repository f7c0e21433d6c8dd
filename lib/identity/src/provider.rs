//! Provider discovery.
//!
//! Discovery happens once per process. [`ProviderHandle`] wraps a
//! [`MetadataSource`] in a `OnceCell`: the first caller fetches, concurrent
//! callers wait for that fetch, everyone after reads the cached value. A
//! failed fetch is not cached, so a later call tries again.

use async_trait::async_trait;
use jsonwebtoken::Algorithm;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use openidconnect::core::{CoreJsonWebKeySet, CoreJwsSigningAlgorithm, CoreProviderMetadata};
use openidconnect::{AuthUrl, IssuerUrl, TokenUrl};
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::AuthError;

/// What keyward needs from a provider's discovery document.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub issuer: IssuerUrl,
    pub authorization_endpoint: AuthUrl,
    pub token_endpoint: Option<TokenUrl>,
    /// Signing keys usable for ID-token verification.
    pub jwks: JwkSet,
    /// ID-token algorithms the provider advertises. Unsupported ones are
    /// dropped during discovery.
    pub signing_algs: Vec<Algorithm>,
}

impl From<CoreProviderMetadata> for ProviderMetadata {
    fn from(metadata: CoreProviderMetadata) -> Self {
        Self {
            issuer: metadata.issuer().clone(),
            authorization_endpoint: metadata.authorization_endpoint().clone(),
            token_endpoint: metadata.token_endpoint().cloned(),
            jwks: verification_keys(metadata.jwks()),
            signing_algs: metadata
                .id_token_signing_alg_values_supported()
                .iter()
                .filter_map(jwt_algorithm)
                .collect(),
        }
    }
}

/// Re-reads the discovered key set as `jsonwebtoken` keys. Keys of a type
/// `jsonwebtoken` cannot use are skipped.
fn verification_keys(jwks: &CoreJsonWebKeySet) -> JwkSet {
    let keys = jwks
        .keys()
        .iter()
        .filter_map(|key| {
            let parsed = serde_json::to_value(key).and_then(serde_json::from_value::<Jwk>);
            match parsed {
                Ok(jwk) => Some(jwk),
                Err(e) => {
                    warn!(error = %e, "skipping unusable signing key");
                    None
                }
            }
        })
        .collect();
    JwkSet { keys }
}

fn jwt_algorithm(alg: &CoreJwsSigningAlgorithm) -> Option<Algorithm> {
    match alg {
        CoreJwsSigningAlgorithm::HmacSha256 => Some(Algorithm::HS256),
        CoreJwsSigningAlgorithm::HmacSha384 => Some(Algorithm::HS384),
        CoreJwsSigningAlgorithm::HmacSha512 => Some(Algorithm::HS512),
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256 => Some(Algorithm::RS256),
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha384 => Some(Algorithm::RS384),
        CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha512 => Some(Algorithm::RS512),
        CoreJwsSigningAlgorithm::RsaSsaPssSha256 => Some(Algorithm::PS256),
        CoreJwsSigningAlgorithm::RsaSsaPssSha384 => Some(Algorithm::PS384),
        CoreJwsSigningAlgorithm::RsaSsaPssSha512 => Some(Algorithm::PS512),
        CoreJwsSigningAlgorithm::EcdsaP256Sha256 => Some(Algorithm::ES256),
        CoreJwsSigningAlgorithm::EcdsaP384Sha384 => Some(Algorithm::ES384),
        _ => None,
    }
}

/// Somewhere provider metadata can be fetched from.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetches the provider's metadata and signing keys.
    async fn fetch(&self) -> Result<ProviderMetadata, Report<AuthError>>;
}

/// Fetches metadata via OIDC discovery (`/.well-known/openid-configuration`
/// plus the JWKS it points at).
#[derive(Debug, Clone)]
pub struct OidcDiscovery {
    issuer: IssuerUrl,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl OidcDiscovery {
    /// Creates a discovery source for `issuer`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the issuer is not a URL or the HTTP client
    /// cannot be built.
    pub fn new(issuer: &str, timeout: Duration) -> Result<Self, Report<AuthError>> {
        let issuer = IssuerUrl::new(issuer.to_string()).map_err(|e| AuthError::Configuration {
            reason: format!("invalid issuer URL: {e}"),
        })?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Configuration {
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            issuer,
            http_client,
            timeout,
        })
    }
}

#[async_trait]
impl MetadataSource for OidcDiscovery {
    #[instrument(skip(self), fields(issuer = %self.issuer.as_str()))]
    async fn fetch(&self) -> Result<ProviderMetadata, Report<AuthError>> {
        let discovery =
            CoreProviderMetadata::discover_async(self.issuer.clone(), &self.http_client);
        let metadata = tokio::time::timeout(self.timeout, discovery)
            .await
            .map_err(|_| AuthError::UpstreamProviderFailure {
                reason: format!("discovery timed out after {:?}", self.timeout),
            })?
            .map_err(|e| AuthError::UpstreamProviderFailure {
                reason: format!("failed to discover provider: {e}"),
            })?;

        info!("discovered OIDC provider");
        Ok(metadata.into())
    }
}

/// Lazily discovered provider metadata, shared by everything that talks to
/// the provider.
#[derive(Clone)]
pub struct ProviderHandle {
    source: Arc<dyn MetadataSource>,
    metadata: Arc<OnceCell<ProviderMetadata>>,
}

impl ProviderHandle {
    /// Creates a handle that discovers on first use.
    #[must_use]
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            metadata: Arc::new(OnceCell::new()),
        }
    }

    /// Creates a handle that is already initialized.
    #[must_use]
    pub fn from_metadata(metadata: ProviderMetadata) -> Self {
        let source: Arc<dyn MetadataSource> = Arc::new(Preloaded(metadata.clone()));
        Self {
            source,
            metadata: Arc::new(OnceCell::new_with(Some(metadata))),
        }
    }

    /// Returns the provider metadata, discovering it first if needed.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamProviderFailure` if discovery fails. The next call
    /// will try again.
    pub async fn metadata(&self) -> Result<&ProviderMetadata, Report<AuthError>> {
        self.metadata
            .get_or_try_init(|| self.source.fetch())
            .await
    }

    /// Returns true once discovery has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.metadata.initialized()
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

struct Preloaded(ProviderMetadata);

#[async_trait]
impl MetadataSource for Preloaded {
    async fn fetch(&self) -> Result<ProviderMetadata, Report<AuthError>> {
        Ok(self.0.clone())
    }
}
