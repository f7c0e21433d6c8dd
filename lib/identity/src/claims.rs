//! Raw ID-token claims.
//!
//! Cognito encodes some booleans as strings (`"email_verified": "true"` for
//! federated users, `"primary": "true"` inside `identities`), so boolean
//! claims here accept either form.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rootcause::prelude::Report;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::AuthError;

/// The subset of ID-token claims keyward cares about.
///
/// Claim names follow Cognito conventions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(rename = "cognito:username", default)]
    pub cognito_username: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(rename = "custom:role", default)]
    pub role: Option<String>,
    /// Legacy role attribute, used when `custom:role` is absent.
    #[serde(rename = "custom:userRole", default)]
    pub user_role: Option<String>,
    #[serde(rename = "cognito:preferred_role", default)]
    pub preferred_role: Option<String>,
    /// Roles the subject may assume. `None` when the claim is absent.
    #[serde(rename = "cognito:roles", default)]
    pub roles: Option<Vec<String>>,
    #[serde(rename = "cognito:groups", default)]
    pub groups: Vec<String>,
    #[serde(rename = "custom:tenantId", default)]
    pub tenant_id: Option<String>,
    #[serde(rename = "custom:serviceProviderId", default)]
    pub service_provider_id: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub email_verified: Option<bool>,
    /// Upstream identity providers linked to the user. Present for users
    /// who signed in through a federated or social provider.
    #[serde(default)]
    pub identities: Vec<LinkedIdentity>,
}

/// One entry of the `identities` claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedIdentity {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub primary: Option<bool>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub is_social: Option<bool>,
    #[serde(default)]
    pub date_created: Option<String>,
}

impl LinkedIdentity {
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary.unwrap_or(false)
    }

    #[must_use]
    pub fn is_social(&self) -> bool {
        self.is_social.unwrap_or(false)
    }

    /// True if the provider name or type is `Google`.
    #[must_use]
    pub fn is_google(&self) -> bool {
        self.provider_name == GOOGLE_PROVIDER
            || self.provider_type.as_deref() == Some(GOOGLE_PROVIDER)
    }
}

const GOOGLE_PROVIDER: &str = "Google";

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    Text(String),
}

/// Reads a boolean sent either as JSON `true`/`false` or as the strings
/// `"true"`/`"false"` (any case).
fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(value)) => Ok(Some(value)),
        Some(BoolOrString::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(de::Error::invalid_value(
                de::Unexpected::Str(other),
                &"a boolean or \"true\"/\"false\"",
            )),
        },
    }
}

impl IdentityClaims {
    /// Decodes the payload segment of a compact JWT without checking the
    /// signature.
    ///
    /// Only call this on tokens that have been verified, or where the
    /// claims are forwarded to a party that verifies them itself.
    ///
    /// # Errors
    ///
    /// Returns `TokenValidationFailed` if the token is not a three-part JWT
    /// or its payload is not a JSON object.
    pub fn decode_unverified(raw_token: &str) -> Result<Self, Report<AuthError>> {
        let mut parts = raw_token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => {
                return Err(AuthError::TokenValidationFailed {
                    reason: "invalid JWT format".to_string(),
                }
                .into());
            }
        };

        // Some issuers pad their segments.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::TokenValidationFailed {
                reason: format!("failed to decode JWT payload: {e}"),
            })?;

        let claims = serde_json::from_slice(&bytes).map_err(|e| {
            AuthError::TokenValidationFailed {
                reason: format!("failed to parse JWT payload: {e}"),
            }
        })?;
        Ok(claims)
    }
}

/// Returns the value if it is present and not blank.
pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_payload(payload: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.sig")
    }

    #[test]
    fn decodes_cognito_claims() {
        let token = jwt_with_payload(&serde_json::json!({
            "sub": "abc-123",
            "email": "jane@example.com",
            "cognito:username": "jane",
            "custom:role": "admin",
            "custom:tenantId": "tenant-9",
            "cognito:preferred_role": "arn:aws:iam::1:role/A",
            "cognito:roles": ["arn:aws:iam::1:role/A", "arn:aws:iam::1:role/B"],
            "cognito:groups": ["admins"],
            "exp": 1_700_000_000,
            "email_verified": true
        }));

        let claims = IdentityClaims::decode_unverified(&token).expect("decode");

        assert_eq!(claims.sub, "abc-123");
        assert_eq!(claims.email.as_deref(), Some("jane@example.com"));
        assert_eq!(claims.cognito_username.as_deref(), Some("jane"));
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert_eq!(claims.tenant_id.as_deref(), Some("tenant-9"));
        assert_eq!(
            claims.preferred_role.as_deref(),
            Some("arn:aws:iam::1:role/A")
        );
        assert_eq!(claims.roles.as_ref().map(Vec::len), Some(2));
        assert_eq!(claims.groups, vec!["admins"]);
        assert_eq!(claims.exp, Some(1_700_000_000));
    }

    #[test]
    fn absent_roles_differs_from_empty_roles() {
        let absent = jwt_with_payload(&serde_json::json!({"sub": "x"}));
        let empty = jwt_with_payload(&serde_json::json!({"sub": "x", "cognito:roles": []}));

        assert_eq!(
            IdentityClaims::decode_unverified(&absent)
                .expect("decode")
                .roles,
            None
        );
        assert_eq!(
            IdentityClaims::decode_unverified(&empty)
                .expect("decode")
                .roles,
            Some(Vec::new())
        );
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in ["", "abc", "a.b", "a.b.c.d", "a.!!!.c"] {
            let err = IdentityClaims::decode_unverified(bad).expect_err(bad);
            assert!(matches!(
                err.current_context(),
                AuthError::TokenValidationFailed { .. }
            ));
        }
    }

    #[test]
    fn rejects_non_object_payload() {
        let header = URL_SAFE_NO_PAD.encode("{}");
        let body = URL_SAFE_NO_PAD.encode("[1,2,3]");
        assert!(IdentityClaims::decode_unverified(&format!("{header}.{body}.s")).is_err());
    }

    #[test]
    fn booleans_accept_string_form() {
        let token = jwt_with_payload(&serde_json::json!({
            "sub": "x",
            "email_verified": "true",
            "identities": [{
                "userId": "1234567890",
                "providerName": "Google",
                "providerType": "Google",
                "issuer": null,
                "primary": "true",
                "dateCreated": "1583798400000"
            }]
        }));

        let claims = IdentityClaims::decode_unverified(&token).expect("decode");

        assert_eq!(claims.email_verified, Some(true));
        assert_eq!(claims.identities.len(), 1);
        let identity = &claims.identities[0];
        assert!(identity.is_primary());
        assert!(identity.is_google());
        assert!(!identity.is_social());
        assert_eq!(identity.user_id.as_deref(), Some("1234567890"));
    }

    #[test]
    fn booleans_accept_json_form() {
        let token = jwt_with_payload(&serde_json::json!({
            "sub": "x",
            "email_verified": false,
            "identities": [{"providerName": "Facebook", "primary": false, "isSocial": "TRUE"}]
        }));

        let claims = IdentityClaims::decode_unverified(&token).expect("decode");

        assert_eq!(claims.email_verified, Some(false));
        assert!(!claims.identities[0].is_primary());
        assert!(claims.identities[0].is_social());
        assert!(!claims.identities[0].is_google());
    }

    #[test]
    fn unrecognized_boolean_string_is_rejected() {
        let token = jwt_with_payload(&serde_json::json!({"sub": "x", "email_verified": "yes"}));
        assert!(IdentityClaims::decode_unverified(&token).is_err());
    }

    #[test]
    fn non_blank_filters_whitespace() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" x ")), Some("x"));
    }
}
