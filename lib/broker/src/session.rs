//! Federation session names.

/// Longest session name the federation service accepts.
pub const MAX_SESSION_NAME_LEN: usize = 64;

/// Builds `<prefix>-<sanitized email>`, or just the prefix when the email
/// sanitizes to nothing, truncated to [`MAX_SESSION_NAME_LEN`].
#[must_use]
pub fn session_name(prefix: &str, email: Option<&str>) -> String {
    let sanitized = email.map(sanitize).unwrap_or_default();
    let name = if sanitized.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}-{sanitized}")
    };
    truncate(name)
}

/// Keeps only ASCII alphanumerics and `=.@-`.
#[must_use]
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '.' | '@' | '-'))
        .collect()
}

fn truncate(name: String) -> String {
    name.chars().take(MAX_SESSION_NAME_LEN).collect()
}
