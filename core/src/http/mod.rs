pub mod client;
#[cfg(test)]
pub(crate) mod mock;

pub use client::ApiClient;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left untouched in a single path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Percent-encodes one path segment (target names, scan ids).
pub fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT).to_string()
}

/// Joins a provider base URL and a relative path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Short, single-line excerpt of an upstream body for error messages.
pub fn body_excerpt(body: &str) -> String {
    let flat: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.is_empty() {
        return "empty response body".to_string();
    }
    crate::core::finding::truncate_text(&flat, 200)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("example.com"), "example.com");
        assert_eq!(encode_segment("2001:db8::1"), "2001%3Adb8%3A%3A1");
        assert_eq!(encode_segment("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://api.example/v1/", "/scans"), "https://api.example/v1/scans");
        assert_eq!(join_url("https://api.example", "scans/1"), "https://api.example/scans/1");
    }

    #[test]
    fn test_body_excerpt() {
        assert_eq!(body_excerpt("  \n "), "empty response body");
        assert_eq!(body_excerpt("{\"error\":\n  \"quota\"}"), "{\"error\": \"quota\"}");
    }
}
