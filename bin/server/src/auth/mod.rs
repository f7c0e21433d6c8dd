//! Authentication routes and the state they share.
//!
//! Login is stateless on the server: the OAuth2 `state` parameter carries
//! the sealed nonce and redirect target, and the verified ID token itself
//! is handed to the browser in the `jwt` cookie. Credential requests
//! present that token again and are verified before brokering.

pub mod middleware;
pub mod routes;

use keyward_broker::{CredentialBroker, InMemoryCredentialCache, StsFederationClient};
use keyward_core::{Clock, SystemClock};
use keyward_identity::{
    FlowOrchestrator, OAuthCodeExchanger, OidcDiscovery, ProviderHandle, TokenVerifier,
};
use keyward_state::StateCodec;
use rootcause::prelude::Report;
use std::sync::Arc;

use crate::config::{CookieConfig, ServerConfig};
use crate::error::StartupError;

pub use middleware::{AuthRejection, RequireAuth};
pub use routes::{callback, healthz, login, logout, sts_credentials};

/// Shared application state.
pub struct AppState {
    /// Login flow driver; also owns the token verifier.
    pub orchestrator: FlowOrchestrator,
    /// Exchanges identity tokens for cloud credentials.
    pub broker: CredentialBroker,
    /// Identity cookie settings.
    pub cookie: CookieConfig,
    /// Time source for cookie lifetimes.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        orchestrator: FlowOrchestrator,
        broker: CredentialBroker,
        cookie: CookieConfig,
    ) -> Self {
        Self {
            orchestrator,
            broker,
            cookie,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Wires the production components from configuration.
    ///
    /// Provider discovery is deferred until first use; see
    /// [`ProviderHandle::metadata`].
    ///
    /// # Errors
    ///
    /// Returns `Identity` or `Broker` if the respective section is unusable.
    pub async fn from_config(config: ServerConfig) -> Result<Self, Report<StartupError>> {
        let identity_error = |e: Report<keyward_identity::AuthError>| StartupError::Identity {
            reason: e.to_string(),
        };

        let identity = Arc::new(config.identity);
        let issuer = identity.issuer().map_err(identity_error)?;
        let discovery =
            OidcDiscovery::new(&issuer, identity.request_timeout()).map_err(identity_error)?;
        let provider = ProviderHandle::new(Arc::new(discovery));

        let exchanger =
            OAuthCodeExchanger::new(provider.clone(), &identity).map_err(identity_error)?;
        let verifier = TokenVerifier::new(provider, &identity);
        let codec = Arc::new(StateCodec::new(&config.state.key()));
        let orchestrator = FlowOrchestrator::new(identity, codec, verifier, Arc::new(exchanger));

        let federation = StsFederationClient::new(&config.broker)
            .await
            .map_err(|e| StartupError::Broker {
                reason: e.to_string(),
            })?;
        let broker = CredentialBroker::new(
            config.broker,
            Arc::new(federation),
            Arc::new(InMemoryCredentialCache::new()),
        );

        Ok(Self::new(orchestrator, broker, config.cookie))
    }
}
