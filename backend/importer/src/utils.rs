use std::sync::LazyLock;

use regex::Regex;

static CONTROL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Cc}\p{Cf}]").unwrap_or_else(|e| panic!("invalid control regex: {e}"))
});

static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap_or_else(|e| panic!("invalid space regex: {e}")));

/// Strips control and format characters that scraped sources tend to carry,
/// then collapses whitespace. Case is kept since the text is shown as is.
pub fn sanitize(input: &str) -> String {
    let spaced = SPACES.replace_all(input, " ");
    let cleaned = CONTROL.replace_all(&spaced, "");

    SPACES.replace_all(cleaned.trim(), " ").into_owned()
}

pub fn sanitize_email(input: &str) -> String {
    sanitize(input).to_lowercase()
}

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
