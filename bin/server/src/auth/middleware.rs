//! Authentication extractors for Axum.

use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use keyward_identity::{AuthError, Principal};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{error, warn};

use super::AppState;

/// Identity cookie name.
pub const IDENTITY_COOKIE: &str = "jwt";

/// Extractor for requiring a verified identity token.
///
/// The token is read from the `jwt` cookie, else from an
/// `Authorization: Bearer` header, and checked by the token verifier.
pub struct RequireAuth(pub Principal);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);

        let token = presented_token(parts).ok_or(AuthRejection::MissingToken)?;

        let principal = app_state
            .orchestrator
            .verifier()
            .verify(&token)
            .await
            .map_err(|e| match e.current_context() {
                AuthError::UpstreamProviderFailure { .. } => AuthRejection::ProviderUnavailable(e),
                _ => AuthRejection::InvalidToken(e),
            })?;

        Ok(RequireAuth(principal))
    }
}

/// The `jwt` cookie, else an `Authorization: Bearer` header.
fn presented_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    let from_cookie = jar
        .get(IDENTITY_COOKIE)
        .map(|cookie| cookie.value().trim().to_string())
        .filter(|token| !token.is_empty());

    from_cookie.or_else(|| {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Rejection type for authentication extractors.
#[derive(Debug)]
pub enum AuthRejection {
    MissingToken,
    InvalidToken(Report<AuthError>),
    ProviderUnavailable(Report<AuthError>),
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::MissingToken => {
                warn!("request carried no identity token");
                (StatusCode::UNAUTHORIZED, "Authentication required")
            }
            Self::InvalidToken(report) => {
                warn!(error = %report, "identity token rejected");
                (StatusCode::UNAUTHORIZED, "Authentication required")
            }
            Self::ProviderUnavailable(report) => {
                error!(error = %report, "identity provider failure");
                (StatusCode::BAD_GATEWAY, "Identity provider unavailable")
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::routes::tests::{app_state, claims, sign};
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use axum::routing::get;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use tower::ServiceExt;

    async fn whoami(RequireAuth(principal): RequireAuth) -> String {
        principal.subject_id().to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .with_state(app_state(Arc::default()))
    }

    async fn call(headers: &[(&str, &str)]) -> (StatusCode, String) {
        let mut request = Request::builder().uri("/whoami");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = app()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn accepts_bearer_token() {
        let bearer = format!("Bearer {}", sign(claims()));
        let (status, body) = call(&[("authorization", bearer.as_str())]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "user-123");
    }

    #[tokio::test]
    async fn accepts_identity_cookie() {
        let cookie = format!("theme=dark; jwt={}", sign(claims()));
        let (status, body) = call(&[("cookie", cookie.as_str())]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "user-123");
    }

    #[tokio::test]
    async fn cookie_takes_precedence_over_bearer() {
        let cookie = format!("jwt={}", sign(claims()));
        let (status, _) = call(&[
            ("cookie", cookie.as_str()),
            ("authorization", "Bearer not-a-token"),
        ])
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_missing_token() {
        let (status, body) = call(&[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, r#"{"error":"Authentication required"}"#);

        let (status, _) = call(&[("authorization", "Bearer   ")]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&[("authorization", "Basic dXNlcjpwYXNz")]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_forged_token() {
        let forged = encode(
            &Header::new(Algorithm::HS256),
            &claims(),
            &EncodingKey::from_secret(b"some-other-secret-entirely-wrong"),
        )
        .unwrap();
        let bearer = format!("Bearer {forged}");

        let (status, _) = call(&[("authorization", bearer.as_str())]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
