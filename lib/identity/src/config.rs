//! Identity provider configuration.
//!
//! Fields with defaults can be omitted when loading from environment
//! variables. The issuer is either given directly or derived from a Cognito
//! region and user pool.

use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::AuthError;

/// Configuration for the OIDC identity provider and login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// The OIDC issuer URL. Takes precedence over `region`/`user_pool_id`.
    #[serde(default)]
    issuer_url: Option<String>,
    /// Cognito region, e.g. "us-east-1".
    #[serde(default)]
    region: Option<String>,
    /// Cognito user pool ID, e.g. "us-east-1_AbCdEf".
    #[serde(default)]
    user_pool_id: Option<String>,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret. Public clients have none.
    #[serde(default)]
    client_secret: Option<String>,
    /// The redirect URI for the OAuth2 callback.
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// Base URL of the frontend. Post-login fallback is `<frontend_url>/dashboard`.
    #[serde(default)]
    frontend_url: String,
    /// Maximum number of automatic login restarts.
    /// Default: 3
    #[serde(default = "default_max_retry_attempts")]
    max_retry_attempts: u32,
    /// Timeout for discovery and token requests, in seconds.
    /// Default: 10
    #[serde(default = "default_request_timeout_seconds")]
    request_timeout_seconds: u64,
    /// Hosted-UI domain used for provider logout, e.g.
    /// "https://auth.example.com". Logout is local-only when unset.
    #[serde(default)]
    logout_domain: Option<String>,
    /// Origins besides the frontend's that login and logout may redirect
    /// to, as a comma-separated string.
    #[serde(default)]
    allowed_redirect_origins: String,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_request_timeout_seconds() -> u64 {
    10
}

impl IdentityConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(client_id: String, redirect_uri: String) -> IdentityConfigBuilder {
        IdentityConfigBuilder::new(client_id, redirect_uri)
    }

    /// Resolves the issuer URL.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if neither an issuer URL nor a Cognito
    /// region and user pool are set.
    pub fn issuer(&self) -> Result<String, Report<AuthError>> {
        if let Some(issuer) = self.issuer_url.as_deref().filter(|s| !s.trim().is_empty()) {
            return Ok(issuer.trim_end_matches('/').to_string());
        }
        match (self.region.as_deref(), self.user_pool_id.as_deref()) {
            (Some(region), Some(pool)) if !region.is_empty() && !pool.is_empty() => Ok(format!(
                "https://cognito-idp.{region}.amazonaws.com/{pool}"
            )),
            _ => Err(AuthError::Configuration {
                reason: "either issuer_url or region and user_pool_id must be set".to_string(),
            }
            .into()),
        }
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret, if any.
    #[must_use]
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Returns the frontend base URL.
    #[must_use]
    pub fn frontend_url(&self) -> &str {
        &self.frontend_url
    }

    /// Where to send the user when no redirect target was requested.
    #[must_use]
    pub fn default_redirect(&self) -> String {
        format!("{}/dashboard", self.frontend_url.trim_end_matches('/'))
    }

    /// Returns `requested` if it is a safe redirect target.
    ///
    /// Safe targets are same-site paths (`/reports`, but not `//host`) and
    /// absolute http(s) URLs on the frontend's origin or an allowed origin.
    #[must_use]
    pub fn permitted_redirect<'a>(&self, requested: &'a str) -> Option<&'a str> {
        let requested = requested.trim();
        if requested.is_empty() || requested.chars().any(|c| c.is_control() || c == '\\') {
            return None;
        }
        if requested.starts_with('/') {
            return (!requested.starts_with("//")).then_some(requested);
        }

        let url = Url::parse(requested).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let origin = url.origin().ascii_serialization();
        std::iter::once(self.frontend_url.as_str())
            .chain(self.allowed_redirect_origins.split(','))
            .filter_map(|allowed| Url::parse(allowed.trim()).ok())
            .any(|allowed| allowed.origin().ascii_serialization() == origin)
            .then_some(requested)
    }

    /// The redirect target to use for a request: `requested` when it is
    /// permitted, otherwise [`IdentityConfig::default_redirect`].
    #[must_use]
    pub fn resolve_redirect(&self, requested: Option<&str>) -> String {
        requested
            .and_then(|r| self.permitted_redirect(r))
            .map_or_else(|| self.default_redirect(), str::to_string)
    }

    /// Returns the maximum number of automatic login restarts.
    #[must_use]
    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    /// Returns the timeout for provider requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Builds the provider logout URL that returns the user to `return_to`.
    ///
    /// Returns `None` when no logout domain is configured or it is not a
    /// valid URL.
    #[must_use]
    pub fn logout_url(&self, return_to: &str) -> Option<Url> {
        let domain = self.logout_domain.as_deref()?.trim_end_matches('/');
        let mut url = Url::parse(&format!("{domain}/logout")).ok()?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("logout_uri", return_to);
        Some(url)
    }
}

/// Builder for `IdentityConfig`.
#[derive(Debug)]
pub struct IdentityConfigBuilder {
    config: IdentityConfig,
    scopes: Vec<String>,
}

impl IdentityConfigBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(client_id: String, redirect_uri: String) -> Self {
        Self {
            config: IdentityConfig {
                issuer_url: None,
                region: None,
                user_pool_id: None,
                client_id,
                client_secret: None,
                redirect_uri,
                scopes: String::new(),
                frontend_url: String::new(),
                max_retry_attempts: default_max_retry_attempts(),
                request_timeout_seconds: default_request_timeout_seconds(),
                logout_domain: None,
                allowed_redirect_origins: String::new(),
            },
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
        }
    }

    /// Sets the issuer URL.
    #[must_use]
    pub fn issuer_url(mut self, issuer_url: String) -> Self {
        self.config.issuer_url = Some(issuer_url);
        self
    }

    /// Derives the issuer from a Cognito region and user pool.
    #[must_use]
    pub fn cognito_pool(mut self, region: String, user_pool_id: String) -> Self {
        self.config.region = Some(region);
        self.config.user_pool_id = Some(user_pool_id);
        self
    }

    /// Sets the client secret.
    #[must_use]
    pub fn client_secret(mut self, secret: String) -> Self {
        self.config.client_secret = Some(secret);
        self
    }

    /// Sets the OAuth2 scopes to request.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Adds a scope to the list of scopes to request.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Sets the frontend base URL.
    #[must_use]
    pub fn frontend_url(mut self, url: String) -> Self {
        self.config.frontend_url = url;
        self
    }

    /// Sets the maximum number of automatic login restarts.
    #[must_use]
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.max_retry_attempts = attempts;
        self
    }

    /// Sets the provider request timeout.
    #[must_use]
    pub fn request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.request_timeout_seconds = seconds;
        self
    }

    /// Sets the hosted-UI domain used for logout.
    #[must_use]
    pub fn logout_domain(mut self, domain: String) -> Self {
        self.config.logout_domain = Some(domain);
        self
    }

    /// Allows redirects to `origin` in addition to the frontend's.
    #[must_use]
    pub fn allow_redirect_origin(mut self, origin: String) -> Self {
        if !self.config.allowed_redirect_origins.is_empty() {
            self.config.allowed_redirect_origins.push(',');
        }
        self.config.allowed_redirect_origins.push_str(&origin);
        self
    }

    /// Builds the `IdentityConfig`.
    #[must_use]
    pub fn build(mut self) -> IdentityConfig {
        self.config.scopes = self.scopes.join(",");
        self.config
    }
}
