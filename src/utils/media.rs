//! Derivation of archive-local names for media URLs.

use url::Url;

/// Parsed information about one media URL.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Archive-local filename (unique per source image, shared across
    /// resolutions of the same image).
    pub base: String,
    /// Pixel width when the URL is a sized thumbnail.
    pub width: Option<u32>,
    /// Device-pixel scale multiplier when the filename carries one.
    pub mult: Option<f32>,
}

/// Derive the archive filename for a media URL.
///
/// Thumbnail URLs of the shape `…/thumb/a/ab/Foo.jpg/220px-Foo.jpg` map to
/// the original `Foo.jpg` with `width = 220`, so every resolution of the
/// same image lands on one archive path and the store can keep the best
/// one. Returns `None` when the URL cannot be parsed.
pub fn media_base(raw_url: &str) -> Option<MediaInfo> {
    let absolute = if raw_url.starts_with("//") {
        format!("https:{raw_url}")
    } else {
        raw_url.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    let segments: Vec<String> = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect();
    let last = segments.last()?.clone();

    let is_thumb = segments.iter().any(|s| s == "thumb");
    let (base, sized) = if is_thumb && segments.len() >= 2 {
        // The original filename is the segment before the sized variant.
        (segments[segments.len() - 2].clone(), last)
    } else {
        (last.clone(), last)
    };

    if base.is_empty() {
        return None;
    }

    Some(MediaInfo {
        width: parse_px_prefix(&sized),
        mult: parse_scale_suffix(&sized),
        base,
    })
}

/// Parse a `220px-` style width prefix.
fn parse_px_prefix(name: &str) -> Option<u32> {
    let idx = name.find("px-")?;
    name[..idx].parse().ok()
}

/// Parse a `@2x` / `@1.5x` scale marker.
fn parse_scale_suffix(name: &str) -> Option<f32> {
    let at = name.rfind('@')?;
    let rest = &name[at + 1..];
    let x = rest.find('x')?;
    rest[..x].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_media_url() {
        let info = media_base("https://upload.wikimedia.org/wikipedia/commons/a/ab/Foo.jpg")
            .expect("parses");
        assert_eq!(info.base, "Foo.jpg");
        assert_eq!(info.width, None);
        assert_eq!(info.mult, None);
    }

    #[test]
    fn test_thumb_url_resolves_to_original() {
        let info = media_base(
            "https://upload.wikimedia.org/wikipedia/commons/thumb/a/ab/Foo.jpg/220px-Foo.jpg",
        )
        .expect("parses");
        assert_eq!(info.base, "Foo.jpg");
        assert_eq!(info.width, Some(220));
    }

    #[test]
    fn test_scale_marker() {
        let info =
            media_base("https://upload.wikimedia.org/w/thumb/a/ab/Foo.png/440px-Foo.png@2x")
                .expect("parses");
        assert_eq!(info.base, "Foo.png");
        assert_eq!(info.width, Some(440));
        assert_eq!(info.mult, Some(2.0));
    }

    #[test]
    fn test_protocol_relative() {
        let info = media_base("//upload.wikimedia.org/a/ab/Bar.gif").expect("parses");
        assert_eq!(info.base, "Bar.gif");
    }

    #[test]
    fn test_unparseable() {
        assert!(media_base("not a url at all \u{0}").is_none());
    }

    #[test]
    fn test_percent_decoding() {
        let info = media_base("https://u.org/a/ab/Caf%C3%A9.jpg").expect("parses");
        assert_eq!(info.base, "Café.jpg");
    }
}
