//! Text normalization so semantically equal documents hash equally.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script.*?</script>|<style.*?</style>|<[^>]+>").unwrap())
}

fn iso_timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}(T[\d:.,+-]*Z?)?").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

const COOKIE_PHRASES: &[&str] = &["cookie policy", "accept cookies", "we use cookies"];
const EDGAR_BOILERPLATE: &[&str] = &[
    "united states securities and exchange commission",
    "sec file number",
];

/// Strips time-varying and source-specific boilerplate so that
/// semantically equal documents hash equally. `source_type`
/// selects extra per-source stripping (currently only `"EDGAR"`).
pub fn normalize(source_type: &str, raw_text: &str) -> String {
    let mut text = html_tag_re().replace_all(raw_text, " ").to_string();
    text = iso_timestamp_re().replace_all(&text, " ").to_string();

    let lowered = text.to_lowercase();
    for phrase in COOKIE_PHRASES {
        if lowered.contains(phrase) {
            text = strip_lines_containing(&text, phrase);
        }
    }

    if source_type.eq_ignore_ascii_case("EDGAR") {
        for phrase in EDGAR_BOILERPLATE {
            text = strip_lines_containing(&text, phrase);
        }
    }

    let collapsed = whitespace_re().replace_all(&text, " ");
    collapsed.trim().to_lowercase()
}

fn strip_lines_containing(text: &str, phrase: &str) -> String {
    text.lines()
        .filter(|line| !line.to_lowercase().contains(phrase))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `SHA-256(normalized)` as lowercase hex.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_html_tags_and_preserves_inner_text() {
        let out = normalize("WEB", "<html><body><script>evil()</script><p>Hello <b>world</b></p></body></html>");
        assert_eq!(out, "hello world");
    }

    #[test]
    fn removes_iso_timestamps() {
        let out = normalize("WEB", "Published 2024-01-05T12:00:00Z by staff");
        assert!(!out.contains("2024"));
    }

    #[test]
    fn strips_cookie_banner_lines() {
        let out = normalize("WEB", "Welcome.\nWe use cookies to improve your experience.\nMain content here.");
        assert!(!out.contains("cookies"));
        assert!(out.contains("main content"));
    }

    #[test]
    fn strips_edgar_boilerplate_lines() {
        let out = normalize("EDGAR", "UNITED STATES SECURITIES AND EXCHANGE COMMISSION\nActual filing content.");
        assert!(!out.contains("securities and exchange"));
        assert!(out.contains("actual filing content"));
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = content_hash(&normalize("WEB", "Hello World"));
        let b = content_hash(&normalize("WEB", "hello   World  "));
        assert_eq!(a, b);
    }
}
