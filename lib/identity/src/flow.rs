//! The authorization-code login flow.
//!
//! ```text
//!   Start ──authorization_url──▶ AwaitingCallback{n}
//!   AwaitingCallback{n} ──ok──▶ Success
//!   AwaitingCallback{n} ──recoverable, n < max──▶ Retrying{n+1} ──▶ AwaitingCallback{n+1}
//!   AwaitingCallback{n} ──recoverable, n >= max──▶ Failed
//!   AwaitingCallback{n} ──terminal──▶ Failed
//! ```
//!
//! The attempt counter is sealed into the `state` parameter and also added
//! to the authorization URL as `oauth_retry`. Providers do not echo unknown
//! parameters back to the callback, so the sealed copy is the one that
//! normally arrives; the larger of the two wins. The flow stays stateless on
//! the server.

use keyward_state::StateCodec;
use oauth2::{CsrfToken, RedirectUrl, Scope};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::exchange::{CodeExchanger, IdTokenClient};
use crate::principal::Principal;
use crate::provider::ProviderHandle;
use crate::verifier::TokenVerifier;
use crate::{AuthError, IdentityConfig};

/// Query parameter carrying the retry counter.
pub const RETRY_QUERY_PARAM: &str = "oauth_retry";

/// Number of random bytes in a login nonce.
const NONCE_BYTES: u32 = 32;

/// How many times the flow has been restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    #[must_use]
    pub const fn new(attempt: u32) -> Self {
        Self { attempt }
    }

    /// Parses the `oauth_retry` value. Absent or unparsable means zero.
    #[must_use]
    pub fn from_query(value: Option<&str>) -> Self {
        Self::new(
            value
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or_default(),
        )
    }

    #[must_use]
    pub const fn attempt(self) -> u32 {
        self.attempt
    }

    /// Returns true if no further restart is allowed.
    #[must_use]
    pub const fn is_exhausted(self, max_attempts: u32) -> bool {
        self.attempt >= max_attempts
    }
}

/// Where a login flow stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Start,
    AwaitingCallback { attempt: u32 },
    Retrying { attempt: u32 },
    Success,
    Failed { attempts: u32 },
}

impl FlowState {
    #[must_use]
    pub const fn after_success() -> Self {
        Self::Success
    }

    /// The state following a failed callback.
    #[must_use]
    pub fn after_failure(error: &AuthError, retry: RetryState, max_attempts: u32) -> Self {
        if error.is_recoverable() && !retry.is_exhausted(max_attempts) {
            Self::Retrying {
                attempt: retry.attempt() + 1,
            }
        } else {
            Self::Failed {
                attempts: retry.attempt(),
            }
        }
    }
}

/// Query parameters delivered to the callback endpoint.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    pub code: Option<String>,
    pub state: Option<String>,
    pub retry: RetryState,
    /// The redirect target the client originally asked for, if it was
    /// echoed back. Used to seed a restarted flow.
    pub requested_redirect: Option<String>,
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct AuthenticatedLogin {
    pub principal: Principal,
    /// Where to send the user next. Never empty.
    pub redirect_target: String,
}

/// What the caller should do after a callback.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Login succeeded.
    Authenticated(AuthenticatedLogin),
    /// Login failed recoverably; send the user to `authorization_url`.
    Retry { authorization_url: Url, attempt: u32 },
}

/// Drives the authorization-code flow end to end.
#[derive(Clone)]
pub struct FlowOrchestrator {
    config: Arc<IdentityConfig>,
    provider: ProviderHandle,
    codec: Arc<StateCodec>,
    verifier: TokenVerifier,
    exchanger: Arc<dyn CodeExchanger>,
}

impl FlowOrchestrator {
    /// Creates an orchestrator. Provider metadata is taken from the
    /// verifier's handle.
    #[must_use]
    pub fn new(
        config: Arc<IdentityConfig>,
        codec: Arc<StateCodec>,
        verifier: TokenVerifier,
        exchanger: Arc<dyn CodeExchanger>,
    ) -> Self {
        Self {
            config,
            provider: verifier.provider().clone(),
            codec,
            verifier,
            exchanger,
        }
    }

    #[must_use]
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Builds the provider authorization URL for a new login attempt.
    ///
    /// A fresh nonce is generated and sealed, together with
    /// `requested_redirect` and the attempt number, into the `state`
    /// parameter. A redirect target that is not permitted (see
    /// [`IdentityConfig::permitted_redirect`]) is replaced by the default.
    ///
    /// # Errors
    ///
    /// `UpstreamProviderFailure` if discovery fails; `Configuration` if the
    /// redirect URI is invalid or the state cannot be sealed.
    #[instrument(skip(self), fields(attempt = retry.attempt()))]
    pub async fn authorization_url(
        &self,
        requested_redirect: &str,
        retry: RetryState,
    ) -> Result<Url, Report<AuthError>> {
        let metadata = self.provider.metadata().await?;

        if !requested_redirect.trim().is_empty()
            && self.config.permitted_redirect(requested_redirect).is_none()
        {
            warn!(requested = %requested_redirect, "redirect target not permitted, using default");
        }
        let requested_redirect = self.config.resolve_redirect(Some(requested_redirect));

        let nonce = CsrfToken::new_random_len(NONCE_BYTES).secret().clone();
        let state = self
            .codec
            .issue_for_attempt(&nonce, &requested_redirect, retry.attempt())
            .map_err(|e| AuthError::Configuration {
                reason: format!("failed to seal state: {e}"),
            })?;

        let redirect_url = RedirectUrl::new(self.config.redirect_uri().to_string()).map_err(
            |e| AuthError::Configuration {
                reason: format!("invalid redirect URI: {e}"),
            },
        )?;

        let client = IdTokenClient::new(oauth2::ClientId::new(self.config.client_id().to_string()))
            .set_auth_uri(metadata.authorization_endpoint.clone())
            .set_redirect_uri(redirect_url);

        let mut request = client.authorize_url(|| CsrfToken::new(state));
        for scope in self.config.scopes() {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        let (mut url, _) = request
            .add_extra_param("access_type", "offline")
            .add_extra_param("nonce", nonce)
            .url();

        if retry.attempt() > 0 {
            url.query_pairs_mut()
                .append_pair(RETRY_QUERY_PARAM, &retry.attempt().to_string());
        }

        let next = FlowState::AwaitingCallback {
            attempt: retry.attempt(),
        };
        debug!(state = ?next, "authorization URL issued");
        Ok(url)
    }

    /// Completes a login from the provider's callback.
    ///
    /// Recoverable failures yield [`CallbackOutcome::Retry`] until the retry
    /// budget is spent, then `RetriesExhausted`. Missing parameters and
    /// provider outages are returned as-is.
    ///
    /// # Errors
    ///
    /// `MissingInput`, `UpstreamProviderFailure`, `Configuration`, or
    /// `RetriesExhausted`.
    #[instrument(skip_all, fields(attempt = tracing::field::Empty))]
    pub async fn handle_callback(
        &self,
        request: CallbackRequest,
    ) -> Result<CallbackOutcome, Report<AuthError>> {
        let code = required(request.code.as_deref(), "code")?;
        let state = required(request.state.as_deref(), "state")?;

        let sealed = self.codec.sealed_attempt(state).unwrap_or_default();
        let retry = RetryState::new(request.retry.attempt().max(sealed));
        tracing::Span::current().record("attempt", retry.attempt());

        let failure = match self.complete(code, state).await {
            Ok(login) => {
                debug!(
                    state = ?FlowState::after_success(),
                    subject = %login.principal.subject_id(),
                    "login completed"
                );
                return Ok(CallbackOutcome::Authenticated(login));
            }
            Err(report) => report,
        };

        let max_attempts = self.config.max_retry_attempts();
        match FlowState::after_failure(failure.current_context(), retry, max_attempts) {
            FlowState::Retrying { attempt } => {
                warn!(
                    error = %failure,
                    attempt,
                    max_attempts,
                    "login failed, restarting flow"
                );
                let redirect = self
                    .config
                    .resolve_redirect(request.requested_redirect.as_deref());
                let authorization_url = self
                    .authorization_url(&redirect, RetryState::new(attempt))
                    .await?;
                Ok(CallbackOutcome::Retry {
                    authorization_url,
                    attempt,
                })
            }
            FlowState::Failed { attempts } if failure.current_context().is_recoverable() => {
                error!(error = %failure, attempts, "login retries exhausted");
                Err(AuthError::RetriesExhausted { attempts }.into())
            }
            _ => {
                error!(error = %failure, "login failed");
                Err(failure)
            }
        }
    }

    async fn complete(
        &self,
        code: &str,
        state: &str,
    ) -> Result<AuthenticatedLogin, Report<AuthError>> {
        let payload = self.codec.open(state).ok_or(AuthError::InvalidState)?;

        let tokens = self.exchanger.exchange(code).await?;
        let id_token = tokens
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::TokenValidationFailed {
                reason: "token response carried no id_token".to_string(),
            })?;

        let principal = self
            .verifier
            .verify_with_nonce(&id_token, &payload.nonce)
            .await?;

        let redirect_target = if payload.redirect_url.is_empty() {
            self.config.default_redirect()
        } else {
            payload.redirect_url
        };

        Ok(AuthenticatedLogin {
            principal,
            redirect_target,
        })
    }
}

impl std::fmt::Debug for FlowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowOrchestrator")
            .field("client_id", &self.config.client_id())
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, Report<AuthError>> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(AuthError::MissingInput {
            field: field.to_string(),
        }
        .into()),
    }
}
