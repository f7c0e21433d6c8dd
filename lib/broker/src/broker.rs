//! The credential broker.

use keyward_core::{Clock, SystemClock, preview};
use keyward_identity::IdentityClaims;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, CachedCredential, CredentialCache};
use crate::role::{authorize_role, select_role};
use crate::session::session_name;
use crate::sts::{FederationClient, FederationRequest};
use crate::{BrokerConfig, BrokerError};

/// Exchanges identity tokens for temporary credentials, caching the result
/// per token until it nears expiry.
///
/// The broker trusts the token's claims for role selection and leaves
/// signature checks to the federation service and to callers that verify
/// tokens before handing them over.
pub struct CredentialBroker {
    config: BrokerConfig,
    federation: Arc<dyn FederationClient>,
    cache: Arc<dyn CredentialCache>,
    clock: Arc<dyn Clock>,
}

impl CredentialBroker {
    #[must_use]
    pub fn new(
        config: BrokerConfig,
        federation: Arc<dyn FederationClient>,
        cache: Arc<dyn CredentialCache>,
    ) -> Self {
        Self {
            config,
            federation,
            cache,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for cache freshness.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Returns credentials for `raw_token`, from cache when still fresh.
    ///
    /// Misses are not coalesced: concurrent misses for one token each
    /// federate, and the last credential written stays cached.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the token is empty or its payload is unreadable
    /// - `NoResolvableRole` if no role can be selected
    /// - `RoleNotPermitted` if the selected role is outside `cognito:roles`
    /// - `UpstreamFederationFailure` if the exchange fails
    #[instrument(skip_all, fields(token = %preview(raw_token)))]
    pub async fn get_credentials(
        &self,
        raw_token: &str,
    ) -> Result<CachedCredential, Report<BrokerError>> {
        if raw_token.trim().is_empty() {
            return Err(BrokerError::InvalidInput {
                reason: "identity token is empty".to_string(),
            }
            .into());
        }

        let key = CacheKey::for_token(raw_token);
        let now = self.clock.now();
        if let Some(cached) = self.cache.get(&key) {
            if cached.is_fresh(now, self.config.safety_buffer()) {
                debug!(cache_key = %key, "credential cache hit");
                return Ok(cached);
            }
            debug!(
                cache_key = %key,
                expiration = %cached.expiration(),
                "cached credentials near expiry"
            );
        }

        let claims =
            IdentityClaims::decode_unverified(raw_token).map_err(|e| BrokerError::InvalidInput {
                reason: e.current_context().to_string(),
            })?;

        let role = select_role(&claims, self.config.fallback_role())?;
        if let Err(e) = authorize_role(&role, claims.roles.as_deref()) {
            warn!(sub = %claims.sub, %role, "role outside the token's allowed roles");
            return Err(e.into());
        }

        let request = FederationRequest {
            role_arn: role,
            session_name: session_name(
                self.config.session_name_prefix(),
                claims.email.as_deref(),
            ),
            web_identity_token: raw_token.to_string(),
            duration_seconds: self.config.duration_seconds(),
        };
        let credentials = self.federation.assume_role(&request).await?;

        let credential = CachedCredential::new(credentials, key);
        self.cache.set(credential.clone());
        info!(
            sub = %claims.sub,
            role = %request.role_arn,
            expiration = %credential.expiration(),
            "issued temporary credentials"
        );
        Ok(credential)
    }
}

impl std::fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCredentialCache, TemporaryCredentials};
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::{DateTime, Duration, Utc};
    use keyward_core::ManualClock;
    use std::sync::Mutex;
    use tokio::sync::Barrier;

    const NOW: i64 = 1_700_000_000;
    const ADMIN: &str = "arn:aws:iam::123:role/AdminRole";
    const EDITOR: &str = "arn:aws:iam::123:role/EditorRole";
    const SUPER: &str = "arn:aws:iam::123:role/SuperRole";
    const DEFAULT: &str = "arn:aws:iam::123:role/DefaultRole";

    /// Records requests and issues credentials valid for `lifetime`.
    struct FakeFederation {
        clock: Arc<ManualClock>,
        lifetime: Duration,
        fail: bool,
        gate: Option<Arc<Barrier>>,
        requests: Mutex<Vec<FederationRequest>>,
    }

    impl FakeFederation {
        fn new(clock: Arc<ManualClock>) -> Self {
            Self {
                clock,
                lifetime: Duration::hours(1),
                fail: false,
                gate: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last(&self) -> FederationRequest {
            self.requests.lock().unwrap().last().cloned().expect("a request")
        }
    }

    #[async_trait]
    impl FederationClient for FakeFederation {
        async fn assume_role(
            &self,
            request: &FederationRequest,
        ) -> Result<TemporaryCredentials, Report<BrokerError>> {
            if let Some(gate) = &self.gate {
                gate.wait().await;
            }
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            if self.fail {
                return Err(BrokerError::UpstreamFederationFailure {
                    reason: "AccessDenied".to_string(),
                }
                .into());
            }
            Ok(TemporaryCredentials {
                access_key_id: format!("ASIA{}", requests.len()),
                secret_access_key: "secret".to_string(),
                session_token: "session".to_string(),
                expiration: self.clock.now() + self.lifetime,
            })
        }
    }

    fn token(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    fn admin_token() -> String {
        token(serde_json::json!({
            "sub": "user-1",
            "email": "jane@example.com",
            "cognito:preferred_role": ADMIN,
            "cognito:roles": [ADMIN, EDITOR],
        }))
    }

    struct Harness {
        clock: Arc<ManualClock>,
        federation: Arc<FakeFederation>,
        cache: Arc<InMemoryCredentialCache>,
        broker: CredentialBroker,
    }

    fn harness_with(config: BrokerConfig, fail: bool) -> Harness {
        let clock = Arc::new(ManualClock::at_timestamp(NOW));
        let mut federation = FakeFederation::new(clock.clone());
        federation.fail = fail;
        let federation = Arc::new(federation);
        let cache = Arc::new(InMemoryCredentialCache::new());
        let broker = CredentialBroker::new(config, federation.clone(), cache.clone())
            .with_clock(clock.clone());
        Harness {
            clock,
            federation,
            cache,
            broker,
        }
    }

    fn harness() -> Harness {
        harness_with(BrokerConfig::default(), false)
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW, 0).unwrap()
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let h = harness();
        let token = admin_token();

        let first = h.broker.get_credentials(&token).await.expect("first");
        let second = h.broker.get_credentials(&token).await.expect("second");

        assert_eq!(h.federation.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first.expiration(), now() + Duration::hours(1));
    }

    #[tokio::test]
    async fn distinct_tokens_are_cached_independently() {
        let h = harness();
        let a = admin_token();
        let b = token(serde_json::json!({
            "sub": "user-2",
            "email": "joe@example.com",
            "cognito:preferred_role": EDITOR,
        }));

        let first = h.broker.get_credentials(&a).await.expect("a");
        let second = h.broker.get_credentials(&b).await.expect("b");

        assert_eq!(h.federation.calls(), 2);
        assert_ne!(first.access_key_id(), second.access_key_id());
        assert_eq!(h.cache.len(), 2);
    }

    #[tokio::test]
    async fn credentials_near_expiry_are_refreshed() {
        let h = harness();
        let token = admin_token();
        h.broker.get_credentials(&token).await.expect("first");

        // Three minutes left, inside the five-minute buffer.
        h.clock.advance(Duration::minutes(57));
        let refreshed = h.broker.get_credentials(&token).await.expect("refresh");

        assert_eq!(h.federation.calls(), 2);
        assert_eq!(refreshed.expiration(), h.clock.now() + Duration::hours(1));
    }

    #[tokio::test]
    async fn credentials_outside_buffer_stay_cached() {
        let h = harness();
        let token = admin_token();
        h.broker.get_credentials(&token).await.expect("first");

        h.clock.advance(Duration::minutes(54));
        h.broker.get_credentials(&token).await.expect("second");

        assert_eq!(h.federation.calls(), 1);
    }

    #[tokio::test]
    async fn request_carries_role_session_and_duration() {
        let h = harness();
        let token = admin_token();
        h.broker.get_credentials(&token).await.expect("credentials");

        let request = h.federation.last();
        assert_eq!(request.role_arn, ADMIN);
        assert_eq!(request.session_name, "user-session-jane@example.com");
        assert_eq!(request.web_identity_token, token);
        assert_eq!(request.duration_seconds, 3600);
    }

    #[tokio::test]
    async fn first_allowed_role_when_none_preferred() {
        let h = harness();
        let token = token(serde_json::json!({
            "sub": "user-1",
            "email": "jane@example.com",
            "cognito:roles": [EDITOR, ADMIN],
        }));
        h.broker.get_credentials(&token).await.expect("credentials");
        assert_eq!(h.federation.last().role_arn, EDITOR);
    }

    #[tokio::test]
    async fn fallback_role_when_token_names_none() {
        let config = BrokerConfig::default()
            .with_fallback_role(DEFAULT.to_string())
            .with_session_name_prefix("my-app".to_string());
        let h = harness_with(config, false);
        let token = token(serde_json::json!({"sub": "user-1"}));

        h.broker.get_credentials(&token).await.expect("credentials");

        let request = h.federation.last();
        assert_eq!(request.role_arn, DEFAULT);
        assert_eq!(request.session_name, "my-app");
    }

    #[tokio::test]
    async fn preferred_role_outside_allowed_roles_is_rejected() {
        let h = harness();
        let token = token(serde_json::json!({
            "sub": "user-1",
            "email": "jane@example.com",
            "cognito:preferred_role": SUPER,
            "cognito:roles": [ADMIN],
        }));

        let err = h.broker.get_credentials(&token).await.expect_err("rejected");

        assert_eq!(
            err.current_context(),
            &BrokerError::RoleNotPermitted {
                role: SUPER.to_string()
            }
        );
        assert_eq!(h.federation.calls(), 0);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn no_role_anywhere() {
        let h = harness();
        let token = token(serde_json::json!({"sub": "user-1", "email": "jane@example.com"}));

        let err = h.broker.get_credentials(&token).await.expect_err("no role");

        assert_eq!(err.current_context(), &BrokerError::NoResolvableRole);
        assert_eq!(h.federation.calls(), 0);
    }

    #[tokio::test]
    async fn empty_and_malformed_tokens_are_invalid_input() {
        let h = harness();
        for raw in ["", "   ", "not-a-jwt", "a.%%%.c"] {
            let err = h.broker.get_credentials(raw).await.expect_err(raw);
            assert!(
                matches!(err.current_context(), BrokerError::InvalidInput { .. }),
                "{raw:?} gave {:?}",
                err.current_context()
            );
        }
        assert_eq!(h.federation.calls(), 0);
    }

    #[tokio::test]
    async fn federation_failure_is_surfaced_and_not_cached() {
        let h = harness_with(BrokerConfig::default(), true);
        let token = admin_token();

        let err = h.broker.get_credentials(&token).await.expect_err("failure");

        assert!(matches!(
            err.current_context(),
            BrokerError::UpstreamFederationFailure { .. }
        ));
        assert_eq!(h.federation.calls(), 1);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn cache_hit_needs_no_parsable_claims() {
        let h = harness();
        let key = CacheKey::for_token("opaque");
        h.cache.set(CachedCredential::new(
            TemporaryCredentials {
                access_key_id: "ASIACACHED".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: "session".to_string(),
                expiration: now() + Duration::hours(1),
            },
            key,
        ));

        let hit = h.broker.get_credentials("opaque").await.expect("hit");

        assert_eq!(hit.access_key_id(), "ASIACACHED");
        assert_eq!(h.federation.calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_misses_for_one_token_both_succeed() {
        let clock = Arc::new(ManualClock::at_timestamp(NOW));
        let mut federation = FakeFederation::new(clock.clone());
        federation.gate = Some(Arc::new(Barrier::new(2)));
        let federation = Arc::new(federation);
        let cache = Arc::new(InMemoryCredentialCache::new());
        let broker =
            CredentialBroker::new(BrokerConfig::default(), federation.clone(), cache.clone())
                .with_clock(clock);
        let token = admin_token();

        let (first, second) = tokio::join!(
            broker.get_credentials(&token),
            broker.get_credentials(&token)
        );
        let first = first.expect("first");
        let second = second.expect("second");

        assert_eq!(federation.calls(), 2);
        assert_ne!(first.access_key_id(), second.access_key_id());
        assert_eq!(cache.len(), 1);
        let cached = cache.get(&CacheKey::for_token(&token)).expect("cached");
        assert!(cached == first || cached == second);

        let third = broker.get_credentials(&token).await.expect("third");
        assert_eq!(third, cached);
        assert_eq!(federation.calls(), 2);
    }
}
