//! Authentication routes for login, callback, logout and credential exchange.

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use keyward_broker::{BrokerError, CachedCredential};
use keyward_identity::{AuthError, CallbackOutcome, CallbackRequest, Principal, RetryState};
use rootcause::prelude::Report;
use serde::Deserialize;
use std::sync::Arc;
use time::Duration as TimeDuration;
use tracing::{error, info, warn};

use super::AppState;
use super::middleware::{IDENTITY_COOKIE, RequireAuth};

/// Cookie lifetime when the token carries no `exp`.
const DEFAULT_COOKIE_MAX_AGE_SECONDS: i64 = 3600;

/// Query parameters accepted by login and logout.
#[derive(Debug, Deserialize)]
pub struct RedirectQuery {
    redirect_url: Option<String>,
}

/// Query parameters for the OIDC callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    oauth_retry: Option<String>,
    redirect_url: Option<String>,
    error: Option<String>,
}

/// Redirects the browser to the identity provider.
///
/// A `redirect_url` outside the frontend's origin and the configured
/// allow-list is replaced by the default target.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedirectQuery>,
) -> Result<Response, ApiError> {
    let redirect = state
        .orchestrator
        .config()
        .resolve_redirect(query.redirect_url.as_deref());

    let url = state
        .orchestrator
        .authorization_url(&redirect, RetryState::default())
        .await?;

    Ok(found(url.as_str()))
}

/// Completes the login, or restarts it while retries remain.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    if let Some(provider_error) = query.error.as_deref() {
        warn!(error = provider_error, "provider returned an error to the callback");
    }

    let request = CallbackRequest {
        code: query.code,
        state: query.state,
        retry: RetryState::from_query(query.oauth_retry.as_deref()),
        requested_redirect: query.redirect_url,
    };

    match state.orchestrator.handle_callback(request).await? {
        CallbackOutcome::Authenticated(login) => {
            info!(subject = %login.principal.subject_id(), "login succeeded");
            let cookie = identity_cookie(&state, &login.principal);
            Ok((jar.add(cookie), found(&login.redirect_target)).into_response())
        }
        CallbackOutcome::Retry {
            authorization_url,
            attempt,
        } => {
            info!(attempt, "restarting login");
            Ok(found(authorization_url.as_str()))
        }
    }
}

/// Clears the identity cookie and ends the provider session when a logout
/// domain is configured.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedirectQuery>,
    jar: CookieJar,
) -> Response {
    let config = state.orchestrator.config();
    let return_to = query
        .redirect_url
        .as_deref()
        .and_then(|r| config.permitted_redirect(r))
        .or_else(|| Some(config.frontend_url()).filter(|f| !f.trim().is_empty()))
        .unwrap_or("/")
        .to_string();

    let target = config
        .logout_url(&return_to)
        .map_or(return_to, |url| url.to_string());

    (jar.add(removal_cookie(&state)), found(&target)).into_response()
}

/// Exchanges the caller's identity token for temporary cloud credentials.
pub async fn sts_credentials(
    State(state): State<Arc<AppState>>,
    RequireAuth(principal): RequireAuth,
) -> Result<Json<CachedCredential>, ApiError> {
    let credential = state.broker.get_credentials(principal.raw_token()).await?;
    info!(
        subject = %principal.subject_id(),
        expiration = %credential.expiration(),
        "issued credentials"
    );
    Ok(Json(credential))
}

/// Liveness check.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

fn identity_cookie(state: &AppState, principal: &Principal) -> Cookie<'static> {
    let max_age = principal
        .expires_at()
        .map_or(DEFAULT_COOKIE_MAX_AGE_SECONDS, |exp| {
            (exp - state.clock.now()).num_seconds().max(0)
        });

    let mut cookie = Cookie::build((IDENTITY_COOKIE, principal.raw_token().to_string()))
        .path("/")
        .http_only(true)
        .secure(state.cookie.secure)
        .same_site(SameSite::None)
        .max_age(TimeDuration::seconds(max_age));
    if let Some(domain) = &state.cookie.domain {
        cookie = cookie.domain(domain.clone());
    }
    cookie.build()
}

fn removal_cookie(state: &AppState) -> Cookie<'static> {
    let mut cookie = Cookie::build((IDENTITY_COOKIE, ""))
        .path("/")
        .http_only(true)
        .secure(state.cookie.secure)
        .same_site(SameSite::None)
        .max_age(TimeDuration::ZERO);
    if let Some(domain) = &state.cookie.domain {
        cookie = cookie.domain(domain.clone());
    }
    cookie.build()
}

/// A `302 Found` redirect. axum's `Redirect` only offers 303, 307 and 308.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Errors surfaced to HTTP clients as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    /// The login flow failed.
    Auth(Report<AuthError>),
    /// Credential brokering failed.
    Broker(Report<BrokerError>),
}

impl From<Report<AuthError>> for ApiError {
    fn from(report: Report<AuthError>) -> Self {
        Self::Auth(report)
    }
}

impl From<Report<BrokerError>> for ApiError {
    fn from(report: Report<BrokerError>) -> Self {
        Self::Broker(report)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Auth(report) => match report.current_context() {
                AuthError::UpstreamProviderFailure { .. } => {
                    error!(error = %report, "identity provider failure");
                    (StatusCode::BAD_GATEWAY, "Identity provider unavailable")
                }
                AuthError::Configuration { .. } => {
                    error!(error = %report, "authentication misconfigured");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                }
                AuthError::MissingInput { .. } => {
                    warn!(error = %report, "incomplete callback");
                    (StatusCode::BAD_REQUEST, "Missing callback parameters")
                }
                _ => {
                    warn!(error = %report, "authentication failed");
                    (StatusCode::BAD_REQUEST, "Authentication failed")
                }
            },
            Self::Broker(report) => match report.current_context() {
                BrokerError::InvalidInput { .. } => {
                    warn!(error = %report, "unreadable identity token");
                    (StatusCode::BAD_REQUEST, "Invalid identity token")
                }
                BrokerError::NoResolvableRole | BrokerError::RoleNotPermitted { .. } => {
                    warn!(error = %report, "credential request denied");
                    (StatusCode::FORBIDDEN, "No permitted role for this identity")
                }
                BrokerError::UpstreamFederationFailure { .. } => {
                    error!(error = %report, "credential federation failed");
                    (StatusCode::BAD_GATEWAY, "Failed to obtain credentials")
                }
                BrokerError::Configuration { .. } => {
                    error!(error = %report, "broker misconfigured");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                }
            },
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
