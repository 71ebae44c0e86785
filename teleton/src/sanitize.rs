//! Input sanitisation for prompt assembly and error surfacing.
//!
//! Identity strings (user names, chat titles) and tool error messages are
//! attacker-influenced; both are stripped of control characters and markup
//! before they reach a prompt or a chat reply.

use once_cell::sync::Lazy;
use regex::Regex;

/// Max length for identity strings embedded in the system prompt.
pub const MAX_IDENTITY_CHARS: usize = 256;
/// Max length for sanitised error messages.
pub const MAX_ERROR_CHARS: usize = 500;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static HEADER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+").expect("header regex"));

fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    input.chars().take(max).collect()
}

/// Sanitises an identity string for prompt embedding: strips control chars,
/// HTML-ish tags and markdown headers, collapses whitespace runs, caps length.
pub fn sanitize_identity(input: &str) -> String {
    let cleaned = strip_control_chars(input);
    let cleaned = TAG_RE.replace_all(&cleaned, "");
    let cleaned = HEADER_RE.replace_all(&cleaned, "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, MAX_IDENTITY_CHARS)
}

/// Sanitises an error message before it is shown to a model or an operator:
/// strips control chars and caps length. Newlines survive (multi-line errors
/// stay readable), everything else control-ish is dropped.
pub fn sanitize_error(input: &str) -> String {
    truncate_chars(&strip_control_chars(input), MAX_ERROR_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_headers() {
        let s = sanitize_identity("# Owner\n<b>Alice</b> <script>x</script>");
        assert_eq!(s, "Owner Alice");
    }

    #[test]
    fn strips_control_chars() {
        let s = sanitize_identity("Al\u{0}ice\u{7}");
        assert_eq!(s, "Alice");
    }

    #[test]
    fn caps_identity_length() {
        let long = "a".repeat(MAX_IDENTITY_CHARS * 2);
        assert_eq!(sanitize_identity(&long).chars().count(), MAX_IDENTITY_CHARS);
    }

    #[test]
    fn error_keeps_newlines_and_caps() {
        let msg = format!("line1\nline2\u{1b}[31m{}", "x".repeat(1000));
        let out = sanitize_error(&msg);
        assert!(out.starts_with("line1\nline2[31m"));
        assert_eq!(out.chars().count(), MAX_ERROR_CHARS);
    }
}
