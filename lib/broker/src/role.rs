//! Federation role selection.

use keyward_identity::IdentityClaims;

use crate::BrokerError;

/// Picks the role to assume: `cognito:preferred_role`, then the first of
/// `cognito:roles`, then `fallback`. Blank values count as absent.
///
/// # Errors
///
/// Returns `NoResolvableRole` if none of the three yields a role.
pub fn select_role(claims: &IdentityClaims, fallback: Option<&str>) -> Result<String, BrokerError> {
    let preferred = claims.preferred_role.as_deref();
    let first_allowed = claims
        .roles
        .as_deref()
        .and_then(|roles| roles.first())
        .map(String::as_str);

    [preferred, first_allowed, fallback]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|role| !role.is_empty())
        .map(str::to_string)
        .ok_or(BrokerError::NoResolvableRole)
}

/// Checks `role` against the token's allow-list.
///
/// No allow-list means no restriction. A present but empty list permits
/// nothing.
///
/// # Errors
///
/// Returns `RoleNotPermitted` if the list exists and lacks `role`.
pub fn authorize_role(role: &str, allowed: Option<&[String]>) -> Result<(), BrokerError> {
    match allowed {
        Some(allowed) if !allowed.iter().any(|candidate| candidate == role) => {
            Err(BrokerError::RoleNotPermitted {
                role: role.to_string(),
            })
        }
        _ => Ok(()),
    }
}
