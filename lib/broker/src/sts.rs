//! Web-identity federation against AWS STS.
//!
//! `AssumeRoleWithWebIdentity` is sent unsigned through the AWS SDK: the
//! identity token is the credential, so no AWS credentials are loaded.

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata};
use chrono::DateTime;
use keyward_core::preview;
use rootcause::prelude::Report;
use std::fmt;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::TemporaryCredentials;
use crate::{BrokerConfig, BrokerError};

/// One `AssumeRoleWithWebIdentity` call.
#[derive(Clone, PartialEq, Eq)]
pub struct FederationRequest {
    pub role_arn: String,
    pub session_name: String,
    pub web_identity_token: String,
    pub duration_seconds: u32,
}

impl fmt::Debug for FederationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederationRequest")
            .field("role_arn", &self.role_arn)
            .field("session_name", &self.session_name)
            .field("web_identity_token", &preview(&self.web_identity_token))
            .field("duration_seconds", &self.duration_seconds)
            .finish()
    }
}

/// Exchanges a web-identity token for temporary credentials.
#[async_trait]
pub trait FederationClient: Send + Sync {
    async fn assume_role(
        &self,
        request: &FederationRequest,
    ) -> Result<TemporaryCredentials, Report<BrokerError>>;
}

/// [`FederationClient`] backed by the AWS SDK STS client.
#[derive(Debug, Clone)]
pub struct StsFederationClient {
    client: aws_sdk_sts::Client,
}

impl StsFederationClient {
    /// Creates a client for the configured region and optional endpoint
    /// override.
    ///
    /// Retries are disabled; a failed federation surfaces to the caller.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the endpoint override is not a URL.
    pub async fn new(config: &BrokerConfig) -> Result<Self, Report<BrokerError>> {
        let region = config.region().to_string();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .no_credentials()
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.request_timeout())
                    .build(),
            );

        if let Some(endpoint) = config.endpoint() {
            Url::parse(endpoint).map_err(|e| BrokerError::Configuration {
                reason: format!("invalid federation endpoint: {e}"),
            })?;
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let client = aws_sdk_sts::Client::new(&sdk_config);

        info!(
            region = %region,
            endpoint_override = config.endpoint().is_some(),
            "STS federation client initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl FederationClient for StsFederationClient {
    #[instrument(skip_all, fields(role = %request.role_arn, session = %request.session_name))]
    async fn assume_role(
        &self,
        request: &FederationRequest,
    ) -> Result<TemporaryCredentials, Report<BrokerError>> {
        let duration = i32::try_from(request.duration_seconds).unwrap_or(i32::MAX);

        let output = self
            .client
            .assume_role_with_web_identity()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .web_identity_token(&request.web_identity_token)
            .duration_seconds(duration)
            .send()
            .await
            .map_err(|e| {
                let reason = match e.code() {
                    Some(code) => format!("{code}: {}", e.message().unwrap_or_default()),
                    None => format!("request failed: {}", DisplayErrorContext(&e)),
                };
                warn!(%reason, "federation refused");
                BrokerError::UpstreamFederationFailure { reason }
            })?;

        let credentials = output.credentials().ok_or_else(|| {
            BrokerError::UpstreamFederationFailure {
                reason: "response carried no credentials".to_string(),
            }
        })?;

        let issued = credentials.expiration();
        let expiration = DateTime::from_timestamp(issued.secs(), issued.subsec_nanos())
            .ok_or_else(|| BrokerError::UpstreamFederationFailure {
                reason: "unreadable credential expiration".to_string(),
            })?;

        debug!(%expiration, "federated credentials issued");
        Ok(TemporaryCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expiration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUCCESS_BODY: &str = r#"<AssumeRoleWithWebIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <AssumeRoleWithWebIdentityResult>
    <Credentials>
      <AccessKeyId>ASIAEXAMPLE</AccessKeyId>
      <SecretAccessKey>secret-key</SecretAccessKey>
      <SessionToken>session-token</SessionToken>
      <Expiration>2023-11-14T23:13:20Z</Expiration>
    </Credentials>
    <SubjectFromWebIdentityToken>user-123</SubjectFromWebIdentityToken>
  </AssumeRoleWithWebIdentityResult>
  <ResponseMetadata>
    <RequestId>req-1</RequestId>
  </ResponseMetadata>
</AssumeRoleWithWebIdentityResponse>"#;

    const ACCESS_DENIED_BODY: &str = r#"<ErrorResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <Error>
    <Type>Sender</Type>
    <Code>AccessDenied</Code>
    <Message>Not authorized to perform sts:AssumeRoleWithWebIdentity</Message>
  </Error>
  <RequestId>req-2</RequestId>
</ErrorResponse>"#;

    fn request() -> FederationRequest {
        FederationRequest {
            role_arn: "arn:aws:iam::123:role/AdminRole".to_string(),
            session_name: "user-session-jane@example.com".to_string(),
            web_identity_token: "header.payload.sig".to_string(),
            duration_seconds: 3600,
        }
    }

    async fn client_for(server: &MockServer) -> StsFederationClient {
        let config = BrokerConfig::default().with_endpoint(server.uri());
        StsFederationClient::new(&config).await.expect("client")
    }

    fn xml(status: u16, body: &str) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_raw(body.as_bytes().to_vec(), "text/xml")
    }

    #[tokio::test]
    async fn assumes_role_with_web_identity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("Action=AssumeRoleWithWebIdentity"))
            .and(body_string_contains("Version=2011-06-15"))
            .and(body_string_contains("RoleArn=arn%3Aaws%3Aiam%3A%3A123%3Arole%2FAdminRole"))
            .and(body_string_contains("WebIdentityToken=header.payload.sig"))
            .and(body_string_contains("DurationSeconds=3600"))
            .respond_with(xml(200, SUCCESS_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let credentials = client_for(&server)
            .await
            .assume_role(&request())
            .await
            .expect("credentials");

        assert_eq!(credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(credentials.secret_access_key, "secret-key");
        assert_eq!(credentials.session_token, "session-token");
        assert_eq!(credentials.expiration.timestamp(), 1_700_003_600);
    }

    #[tokio::test]
    async fn refusal_is_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(xml(403, ACCESS_DENIED_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .assume_role(&request())
            .await
            .expect_err("refused");
        match err.current_context() {
            BrokerError::UpstreamFederationFailure { reason } => {
                assert!(reason.contains("AccessDenied"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_response_is_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(xml(200, "<xml/>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .assume_role(&request())
            .await
            .expect_err("garbage");
        assert!(matches!(
            err.current_context(),
            BrokerError::UpstreamFederationFailure { .. }
        ));
    }

    #[test]
    fn debug_hides_identity_token() {
        let mut request = request();
        request.web_identity_token = "eyJhbGciOiJSUzI1NiJ9.secret.payload".to_string();
        let debug = format!("{request:?}");
        assert!(!debug.contains("secret.payload"));
    }

    #[tokio::test]
    async fn invalid_endpoint_is_configuration_error() {
        let config = BrokerConfig::default().with_endpoint("not a url".to_string());
        let err = StsFederationClient::new(&config)
            .await
            .expect_err("bad endpoint");
        assert!(matches!(
            err.current_context(),
            BrokerError::Configuration { .. }
        ));
    }
}
