//! ID-token verification.

use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use keyward_core::{Clock, SystemClock, preview};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::claims::IdentityClaims;
use crate::principal::{DefaultRolePolicy, Principal};
use crate::provider::{ProviderHandle, ProviderMetadata};
use crate::{AuthError, IdentityConfig};

/// Verifies ID tokens against the discovered provider and turns them into
/// [`Principal`]s.
///
/// Checks signature (against the provider's JWKS, or the client secret for
/// HMAC algorithms), issuer, audience and expiry. With a nonce, also checks
/// the `nonce` claim.
#[derive(Clone)]
pub struct TokenVerifier {
    provider: ProviderHandle,
    client_id: String,
    client_secret: Option<String>,
    clock: Arc<dyn Clock>,
    default_role: Option<Arc<dyn DefaultRolePolicy>>,
}

impl TokenVerifier {
    /// Creates a verifier for the configured client.
    #[must_use]
    pub fn new(provider: ProviderHandle, config: &IdentityConfig) -> Self {
        Self {
            provider,
            client_id: config.client_id().to_string(),
            client_secret: config.client_secret().map(str::to_string),
            clock: Arc::new(SystemClock),
            default_role: None,
        }
    }

    /// Reads time from `clock` for expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses `policy` for users whose token carries no role.
    #[must_use]
    pub fn with_default_role(mut self, policy: Arc<dyn DefaultRolePolicy>) -> Self {
        self.default_role = Some(policy);
        self
    }

    /// Returns the provider handle this verifier checks against.
    #[must_use]
    pub fn provider(&self) -> &ProviderHandle {
        &self.provider
    }

    /// Verifies a bearer ID token.
    ///
    /// # Errors
    ///
    /// `TokenValidationFailed` for any verification or normalization
    /// failure; `UpstreamProviderFailure` if discovery fails.
    pub async fn verify(&self, raw_token: &str) -> Result<Principal, Report<AuthError>> {
        self.verify_inner(raw_token, None).await
    }

    /// Verifies an ID token returned from the login flow, requiring its
    /// `nonce` claim to equal `expected_nonce`.
    ///
    /// # Errors
    ///
    /// As [`TokenVerifier::verify`].
    pub async fn verify_with_nonce(
        &self,
        raw_token: &str,
        expected_nonce: &str,
    ) -> Result<Principal, Report<AuthError>> {
        self.verify_inner(raw_token, Some(expected_nonce)).await
    }

    #[instrument(skip_all, fields(token = %preview(raw_token)))]
    async fn verify_inner(
        &self,
        raw_token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<Principal, Report<AuthError>> {
        let raw_token = raw_token.trim();
        if raw_token.is_empty() {
            return Err(rejected("empty token"));
        }

        let metadata = self.provider.metadata().await?;

        let header = decode_header(raw_token).map_err(|e| {
            warn!(error = %e, "unparsable ID token");
            rejected(format!("malformed token: {e}"))
        })?;
        if !metadata.signing_algs.contains(&header.alg) {
            warn!(alg = ?header.alg, "ID token signed with an algorithm the provider does not use");
            return Err(rejected(format!("signing algorithm {:?} not accepted", header.alg)));
        }
        let key = self.decoding_key(metadata, &header)?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&[metadata.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;

        let claims = decode::<IdentityClaims>(raw_token, &key, &validation)
            .map_err(|e| {
                warn!(error = %e, "ID token rejected");
                rejected(e.to_string())
            })?
            .claims;

        let now = self.clock.now().timestamp();
        match claims.exp {
            Some(exp) if exp > now => {}
            _ => return Err(rejected("token expired")),
        }

        if let Some(expected) = expected_nonce {
            match claims.nonce.as_deref() {
                Some(nonce) if nonce == expected => {}
                Some(_) => return Err(rejected("nonce mismatch")),
                None => return Err(rejected("nonce claim missing")),
            }
        }

        let principal =
            Principal::from_claims(claims, raw_token.to_string(), self.default_role.as_deref())?;

        debug!(
            subject = %principal.subject_id(),
            role = %principal.role(),
            "ID token verified"
        );
        Ok(principal)
    }

    /// Picks the key for `header`: the client secret for HMAC algorithms,
    /// otherwise the JWKS entry whose `kid` matches. A key set with a single
    /// key also serves tokens that carry no `kid`.
    fn decoding_key(
        &self,
        metadata: &ProviderMetadata,
        header: &Header,
    ) -> Result<DecodingKey, Report<AuthError>> {
        if matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            let secret = self
                .client_secret
                .as_deref()
                .ok_or_else(|| rejected("HMAC-signed token but no client secret configured"))?;
            return Ok(DecodingKey::from_secret(secret.as_bytes()));
        }

        let keys = &metadata.jwks.keys;
        let jwk = match header.kid.as_deref() {
            Some(kid) => keys
                .iter()
                .find(|key| key.common.key_id.as_deref() == Some(kid)),
            None if keys.len() == 1 => keys.first(),
            None => None,
        }
        .ok_or_else(|| {
            warn!(kid = ?header.kid, "no signing key matches the ID token");
            rejected("no matching signing key")
        })?;

        DecodingKey::from_jwk(jwk).map_err(|e| rejected(format!("unusable signing key: {e}")))
    }
}

fn rejected(reason: impl Into<String>) -> Report<AuthError> {
    AuthError::TokenValidationFailed {
        reason: reason.into(),
    }
    .into()
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("client_id", &self.client_id.as_str())
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}
