//! Log redaction.

/// Number of characters of a secret that may appear in log output.
pub const PREVIEW_CHARS: usize = 8;

/// Returns at most the first eight characters of `secret`, followed by an
/// ellipsis when anything was cut.
#[must_use]
pub fn preview(secret: &str) -> String {
    let mut chars = secret.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_values_are_cut() {
        assert_eq!(preview("abcdefghijklmnop"), "abcdefgh...");
    }

    #[test]
    fn short_values_are_kept() {
        assert_eq!(preview("abc"), "abc");
        assert_eq!(preview("abcdefgh"), "abcdefgh");
        assert_eq!(preview(""), "");
    }

    #[test]
    fn multibyte_values_do_not_split_characters() {
        assert_eq!(preview("ééééééééé"), "éééééééé...");
    }
}
