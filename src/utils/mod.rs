//! Common utilities and helper functions

pub mod error;
pub mod retry;

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use url::Url;

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    re.replace_all(text.trim(), " ").to_string()
}

/// Remove HTML tags and decode the few entities posts commonly carry
pub fn strip_html(text: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();

    let re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("Invalid regex pattern"));

    let stripped = re.replace_all(text, "");
    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// SHA-256 hex digest of an author handle
pub fn hash_identity(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Last non-empty path segment of a URL
pub fn last_path_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Truncate text to a maximum number of characters
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

/// Format a number of seconds as `1h 02m 03s`
pub fn format_duration_secs(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  hello   world  "), "hello world");
        assert_eq!(normalize_whitespace("hello\n\nworld"), "hello world");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("a &amp; b"), "a & b");
        assert_eq!(strip_html("<br/>"), "");
    }

    #[test]
    fn test_hash_identity() {
        let hash = hash_identity("alice");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_identity("alice"));
        assert_ne!(hash, hash_identity("bob"));
        assert!(!hash.contains("alice"));
    }

    #[test]
    fn test_last_path_segment() {
        assert_eq!(
            last_path_segment("https://x.com/user/status/12345").as_deref(),
            Some("12345")
        );
        assert_eq!(
            last_path_segment("https://x.com/user/status/12345/").as_deref(),
            Some("12345")
        );
        assert_eq!(last_path_segment("not a url"), None);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("very long text here", 10), "very lo...");
        assert_eq!(truncate_text("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_format_duration_secs() {
        assert_eq!(format_duration_secs(5), "5s");
        assert_eq!(format_duration_secs(65), "1m 05s");
        assert_eq!(format_duration_secs(3723), "1h 02m 03s");
    }
}
