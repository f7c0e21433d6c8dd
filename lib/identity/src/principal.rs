//! The normalized, verified identity of a user.

use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use serde::Serialize;
use std::fmt;

use crate::AuthError;
use crate::claims::{IdentityClaims, LinkedIdentity, non_blank};

/// Role assigned when neither the token nor the policy provides one.
pub const FALLBACK_ROLE: &str = "user";

/// Computes a role for users whose token carries none.
///
/// Implemented for any `Fn(&IdentityClaims) -> String`, so a closure works.
pub trait DefaultRolePolicy: Send + Sync {
    /// Returns the role for `claims`. An empty string means "no opinion".
    fn default_role(&self, claims: &IdentityClaims) -> String;
}

impl<F> DefaultRolePolicy for F
where
    F: Fn(&IdentityClaims) -> String + Send + Sync,
{
    fn default_role(&self, claims: &IdentityClaims) -> String {
        self(claims)
    }
}

/// A verified user.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    subject_id: String,
    email: String,
    email_verified: Option<bool>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture_url: Option<String>,
    username: String,
    role: String,
    preferred_role: Option<String>,
    allowed_roles: Option<Vec<String>>,
    groups: Vec<String>,
    tenant_id: Option<String>,
    service_provider_id: Option<String>,
    identities: Vec<LinkedIdentity>,
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    raw_token: String,
}

impl Principal {
    /// Normalizes verified claims into a principal.
    ///
    /// Role precedence: `custom:role`, then `custom:userRole`, then the
    /// policy, then [`FALLBACK_ROLE`]. Username precedence:
    /// `cognito:username`, then `preferred_username`, then the email.
    ///
    /// # Errors
    ///
    /// Returns `TokenValidationFailed` if the claims carry no email.
    pub fn from_claims(
        claims: IdentityClaims,
        raw_token: String,
        policy: Option<&dyn DefaultRolePolicy>,
    ) -> Result<Self, Report<AuthError>> {
        let email = non_blank(claims.email.as_deref())
            .ok_or_else(|| AuthError::TokenValidationFailed {
                reason: "missing required claim: email".to_string(),
            })?
            .to_string();

        let username = non_blank(claims.cognito_username.as_deref())
            .or_else(|| non_blank(claims.preferred_username.as_deref()))
            .unwrap_or(&email)
            .to_string();

        let role = match non_blank(claims.role.as_deref())
            .or_else(|| non_blank(claims.user_role.as_deref()))
        {
            Some(role) => role.to_string(),
            None => policy
                .map(|policy| policy.default_role(&claims))
                .filter(|role| !role.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_ROLE.to_string()),
        };

        let expires_at = claims
            .exp
            .and_then(|exp| DateTime::from_timestamp(exp, 0));

        Ok(Self {
            subject_id: claims.sub,
            email,
            email_verified: claims.email_verified,
            given_name: claims.given_name,
            family_name: claims.family_name,
            picture_url: claims.picture,
            username,
            role,
            preferred_role: claims.preferred_role,
            allowed_roles: claims.roles,
            groups: claims.groups,
            tenant_id: claims.tenant_id,
            service_provider_id: claims.service_provider_id,
            identities: claims.identities,
            expires_at,
            raw_token,
        })
    }

    #[must_use]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// The provider's `email_verified` claim, if it sent one.
    #[must_use]
    pub fn email_verified(&self) -> Option<bool> {
        self.email_verified
    }

    #[must_use]
    pub fn given_name(&self) -> Option<&str> {
        self.given_name.as_deref()
    }

    #[must_use]
    pub fn family_name(&self) -> Option<&str> {
        self.family_name.as_deref()
    }

    #[must_use]
    pub fn picture_url(&self) -> Option<&str> {
        self.picture_url.as_deref()
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The application role. Never empty.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The federation role the provider marked as preferred.
    #[must_use]
    pub fn preferred_role(&self) -> Option<&str> {
        self.preferred_role.as_deref()
    }

    /// Federation roles the user may assume, if the provider listed any.
    #[must_use]
    pub fn allowed_roles(&self) -> Option<&[String]> {
        self.allowed_roles.as_deref()
    }

    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    #[must_use]
    pub fn service_provider_id(&self) -> Option<&str> {
        self.service_provider_id.as_deref()
    }

    /// Upstream identity providers linked to this user.
    #[must_use]
    pub fn identities(&self) -> &[LinkedIdentity] {
        &self.identities
    }

    /// The linked identity marked primary, or the first one if none is.
    #[must_use]
    pub fn primary_identity(&self) -> Option<&LinkedIdentity> {
        self.identities
            .iter()
            .find(|identity| identity.is_primary())
            .or_else(|| self.identities.first())
    }

    /// Name of the upstream provider the user signed in through. `None` for
    /// users local to the pool.
    #[must_use]
    pub fn provider_name(&self) -> Option<&str> {
        self.primary_identity()
            .map(|identity| identity.provider_name.as_str())
            .filter(|name| !name.is_empty())
    }

    #[must_use]
    pub fn is_social_user(&self) -> bool {
        self.identities.iter().any(LinkedIdentity::is_social)
    }

    #[must_use]
    pub fn is_google_user(&self) -> bool {
        self.identities.iter().any(LinkedIdentity::is_google)
    }

    #[must_use]
    pub fn has_profile_picture(&self) -> bool {
        non_blank(self.picture_url.as_deref()).is_some()
    }

    /// When the underlying ID token expires.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// The verified ID token this principal was built from.
    #[must_use]
    pub fn raw_token(&self) -> &str {
        &self.raw_token
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("subject_id", &self.subject_id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("role", &self.role)
            .field("preferred_role", &self.preferred_role)
            .field("allowed_roles", &self.allowed_roles)
            .field("tenant_id", &self.tenant_id)
            .field("expires_at", &self.expires_at)
            .field("raw_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}
