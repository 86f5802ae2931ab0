//! Fixed-pattern stderr redaction (§4.6, I7).
//!
//! Unlike the exact-substring "needle" replacement the teacher's exec tool
//! uses for known secret *values*, this redacts known secret *shapes* — API
//! key formats, bearer/authorization headers, `key = value` assignments, and
//! home-directory paths — from output whose secret values we don't already
//! know ahead of time (the whole point of redacting a child's stderr).

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

struct Pattern {
    regex: Regex,
    replacement: &'static str,
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(build_patterns);

fn build_patterns() -> Vec<Pattern> {
    let build = |pattern: &str| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|e| panic!("built-in redaction pattern must be valid regex: {e}"))
    };

    vec![
        // API-key-shaped tokens: sk-..., sk-ant-..., ghp_..., etc.
        Pattern { regex: build(r"\b(sk|ghp|gho|ghu|ghs|ghr)-[A-Za-z0-9_-]{10,}\b"), replacement: "[REDACTED]" },
        Pattern { regex: build(r"\bBearer\s+[A-Za-z0-9._~+/-]{10,}=*"), replacement: "Bearer [REDACTED]" },
        Pattern { regex: build(r"(?m)^Authorization:\s*.+$"), replacement: "Authorization: [REDACTED]" },
        Pattern {
            regex: build(r#"(?i)\b(api[_-]?key|token|secret|password|credential)\s*[:=]\s*["']?[A-Za-z0-9_\-./+]{6,}["']?"#),
            replacement: "$1=[REDACTED]",
        },
        Pattern { regex: build(r"/(home|Users)/[^/\s]+"), replacement: "/$1/[REDACTED]" },
    ]
}

/// Redacts every fixed pattern from `text`. Idempotent — a second pass over
/// already-redacted text is a no-op (I7).
#[must_use]
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in PATTERNS.iter() {
        out = pattern.regex.replace_all(&out, pattern.replacement).into_owned();
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_api_key_shape() {
        let out = redact("using key sk-ant-REDACTED for auth");
        assert!(!out.contains("sk-ant-REDACTED"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn redacts_bearer_header() {
        let out = redact("curl -H 'Authorization: Bearer abcdef0123456789'");
        assert!(!out.contains("abcdef0123456789"));
    }

    #[test]
    fn redacts_authorization_header_line() {
        let out = redact("Authorization: Basic dXNlcjpwYXNz\nok");
        assert!(!out.contains("dXNlcjpwYXNz"));
        assert!(out.contains("ok"));
    }

    #[test]
    fn redacts_key_value_assignment() {
        let out = redact("export API_KEY=abc123def456");
        assert!(!out.contains("abc123def456"));
    }

    #[test]
    fn redacts_home_directory_paths() {
        let out = redact("file not found: /home/alice/.ssh/id_rsa");
        assert!(!out.contains("/home/alice"));
        assert!(out.contains("/home/[REDACTED]"));
    }

    #[test]
    fn redaction_is_idempotent() {
        let once = redact("token=supersecretvalue123 and Authorization: Bearer xyz1234567890");
        let twice = redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let out = redact("build succeeded in 3.2s");
        assert_eq!(out, "build succeeded in 3.2s");
    }
}
