//! Authorization-code exchange.

use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthorizationCode, ClientId, ClientSecret, ExtraTokenFields, RedirectUrl, RequestTokenError,
    StandardRevocableToken, StandardTokenResponse, TokenResponse,
};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::provider::ProviderHandle;
use crate::{AuthError, IdentityConfig};

/// Token-endpoint fields beyond the OAuth2 standard ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

pub(crate) type IdTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

/// An OAuth2 client whose token responses carry an ID token.
pub(crate) type IdTokenClient = oauth2::Client<
    BasicErrorResponse,
    IdTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// Tokens returned by a successful code exchange.
#[derive(Clone, Default)]
pub struct TokenSet {
    pub id_token: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl From<IdTokenResponse> for TokenSet {
    fn from(response: IdTokenResponse) -> Self {
        Self {
            id_token: response.extra_fields().id_token.clone(),
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            expires_in: response.expires_in(),
        }
    }
}

/// Trades an authorization code for tokens.
#[async_trait]
pub trait CodeExchanger: Send + Sync {
    /// Exchanges `code` at the provider's token endpoint.
    ///
    /// A provider refusal (e.g. `invalid_grant`) is `CodeRejected`;
    /// transport and parse failures are `UpstreamProviderFailure`.
    async fn exchange(&self, code: &str) -> Result<TokenSet, Report<AuthError>>;
}

/// [`CodeExchanger`] speaking the OAuth2 authorization-code grant.
#[derive(Debug, Clone)]
pub struct OAuthCodeExchanger {
    provider: ProviderHandle,
    client_id: ClientId,
    client_secret: Option<ClientSecret>,
    redirect_url: RedirectUrl,
    http_client: reqwest::Client,
}

impl OAuthCodeExchanger {
    /// Creates an exchanger for the configured client.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the redirect URI is invalid or the HTTP
    /// client cannot be built.
    pub fn new(
        provider: ProviderHandle,
        config: &IdentityConfig,
    ) -> Result<Self, Report<AuthError>> {
        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string()).map_err(|e| {
            AuthError::Configuration {
                reason: format!("invalid redirect URI: {e}"),
            }
        })?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AuthError::Configuration {
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            provider,
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: config
                .client_secret()
                .map(|secret| ClientSecret::new(secret.to_string())),
            redirect_url,
            http_client,
        })
    }
}

#[async_trait]
impl CodeExchanger for OAuthCodeExchanger {
    #[instrument(skip_all)]
    async fn exchange(&self, code: &str) -> Result<TokenSet, Report<AuthError>> {
        let metadata = self.provider.metadata().await?;
        let token_url = metadata.token_endpoint.clone().ok_or_else(|| {
            AuthError::UpstreamProviderFailure {
                reason: "provider advertises no token endpoint".to_string(),
            }
        })?;

        let client = IdTokenClient::new(self.client_id.clone())
            .set_token_uri(token_url)
            .set_redirect_uri(self.redirect_url.clone());
        let client = match &self.client_secret {
            Some(secret) => client.set_client_secret(secret.clone()),
            None => client,
        };

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(response) => {
                    warn!(error = %response, "provider rejected authorization code");
                    AuthError::CodeRejected {
                        reason: response.to_string(),
                    }
                }
                other => {
                    warn!(error = %other, "token request failed");
                    AuthError::UpstreamProviderFailure {
                        reason: format!("token exchange failed: {other}"),
                    }
                }
            })?;

        debug!(
            has_id_token = response.extra_fields().id_token.is_some(),
            "authorization code exchanged"
        );
        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_carries_id_token() {
        let response: IdTokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "at",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt",
            "id_token": "header.payload.sig"
        }))
        .expect("deserialize");

        let tokens = TokenSet::from(response);
        assert_eq!(tokens.id_token.as_deref(), Some("header.payload.sig"));
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt"));
        assert_eq!(tokens.expires_in, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn token_response_without_id_token() {
        let response: IdTokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "at",
            "token_type": "bearer"
        }))
        .expect("deserialize");

        assert!(TokenSet::from(response).id_token.is_none());
    }

    #[test]
    fn debug_redacts_tokens() {
        let tokens = TokenSet {
            id_token: Some("secret-id".to_string()),
            access_token: "secret-access".to_string(),
            refresh_token: None,
            expires_in: None,
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("secret-id"));
        assert!(!debug.contains("secret-access"));
    }
}
