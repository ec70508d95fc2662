//! Small pure helpers shared across the pipeline.

mod media;

pub use media::{media_base, MediaInfo};

/// Escape HTML special characters for safe rendering.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Strip the scheme from a URL, leaving `host/path`.
///
/// Used as the key into the blob cache so that http/https variants of the
/// same object share one entry.
pub fn strip_http(url: &str) -> String {
    let trimmed = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("//"))
        .unwrap_or(url);
    trimmed.to_string()
}

/// Percent-encode an article id for use inside archive HTML.
///
/// Each path segment is encoded independently so that `/` separators
/// survive; `decode_article_id` is the inverse for ids whose segments
/// contain no literal `/`.
pub fn encode_article_id(id: &str) -> String {
    id.split('/')
        .map(|seg| urlencoding::encode(seg).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Inverse of [`encode_article_id`].
pub fn decode_article_id(encoded: &str) -> String {
    urlencoding::decode(encoded)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| encoded.to_string())
}

/// Relative prefix from an article id to the archive root.
///
/// An article stored at `A/Foo/Bar` needs `../../../` to reach the root
/// before descending into another namespace.
pub fn relative_root_for(article_id: &str) -> String {
    let depth = article_id.matches('/').count() + 1;
    "../".repeat(depth)
}

/// Map an ISO 639-1 code to its ISO 639-3 equivalent.
///
/// Falls back to the two-letter code when the language is not in the
/// table; callers treat the value as opaque.
pub fn iso2_to_iso3(iso2: &str) -> String {
    let iso3 = match iso2 {
        "en" => "eng",
        "de" => "deu",
        "fr" => "fra",
        "es" => "spa",
        "it" => "ita",
        "pt" => "por",
        "nl" => "nld",
        "pl" => "pol",
        "ru" => "rus",
        "ja" => "jpn",
        "zh" => "zho",
        "ar" => "ara",
        "fa" => "fas",
        "he" => "heb",
        "hi" => "hin",
        "ko" => "kor",
        "sv" => "swe",
        "tr" => "tur",
        "uk" => "ukr",
        "vi" => "vie",
        _ => return iso2.to_string(),
    };
    iso3.to_string()
}

/// First character of a title, upper-cased, for alphabetical grouping of
/// category listings.
pub fn group_letter(title: &str) -> String {
    title
        .chars()
        .next()
        .map(|c| c.to_uppercase().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape_basic() {
        assert_eq!(html_escape("hello"), "hello");
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("a & b"), "a &amp; b");
    }

    #[test]
    fn test_strip_http() {
        assert_eq!(strip_http("https://a.org/x.png"), "a.org/x.png");
        assert_eq!(strip_http("http://a.org/x.png"), "a.org/x.png");
        assert_eq!(strip_http("//a.org/x.png"), "a.org/x.png");
        assert_eq!(strip_http("a.org/x.png"), "a.org/x.png");
    }

    #[test]
    fn test_article_id_round_trip() {
        // encode(decode(x)) == x for ids whose segments contain no '/'
        for x in ["London", "Foo%20Bar", "A%C3%A9"] {
            assert_eq!(encode_article_id(&decode_article_id(x)), x);
        }
    }

    #[test]
    fn test_article_id_preserves_slashes() {
        assert_eq!(encode_article_id("HMS/Beagle"), "HMS/Beagle");
        assert_eq!(encode_article_id("a b/c d"), "a%20b/c%20d");
    }

    #[test]
    fn test_relative_root() {
        assert_eq!(relative_root_for("London"), "../");
        assert_eq!(relative_root_for("HMS/Beagle"), "../../");
    }

    #[test]
    fn test_iso3_fallback() {
        assert_eq!(iso2_to_iso3("en"), "eng");
        assert_eq!(iso2_to_iso3("xx"), "xx");
    }

    #[test]
    fn test_group_letter() {
        assert_eq!(group_letter("apple"), "A");
        assert_eq!(group_letter("Ärzte"), "Ä");
        assert_eq!(group_letter(""), "");
    }
}
