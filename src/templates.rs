//! Pure HTML fragment builders.
//!
//! Every function maps data to a fragment string; no I/O, no state. The
//! section templates chain through `__SUB_LEVEL_SECTION_<i>__` anchors
//! that the renderer resolves while walking the section list.

use crate::models::PageRef;
use crate::utils::{encode_article_id, html_escape};

/// Placeholder anchor consumed by the next section in the walk.
pub fn section_placeholder(index: usize) -> String {
    format!("__SUB_LEVEL_SECTION_{index}__")
}

/// Lead section wrapper; opens the section chain at slot 0.
pub fn lead_section(lead_html: &str) -> String {
    format!(
        "<div id=\"mw-content-text\">\n{lead_html}\n</div>{}",
        section_placeholder(0)
    )
}

/// A top-level section, appended after its placeholder is cleared.
pub fn section(anchor: &str, line: &str, text: &str, next_index: usize) -> String {
    format!(
        "<section class=\"mw-section\"><h2 id=\"{}\">{line}</h2>\n{text}\n{}</section>",
        html_escape(anchor),
        section_placeholder(next_index)
    )
}

/// A nested subsection, spliced in place of its placeholder.
pub fn subsection(anchor: &str, line: &str, text: &str, toclevel: u32, next_index: usize) -> String {
    // toclevel 2 renders as h3 and so on, capped at h6.
    let level = (toclevel + 1).min(6);
    format!(
        "<section class=\"mw-subsection\"><h{level} id=\"{}\">{line}</h{level}>\n{text}\n{}</section>",
        html_escape(anchor),
        section_placeholder(next_index)
    )
}

/// Alphabetically grouped listing used for sub-categories and sub-pages.
pub fn member_listing(heading: &str, groups: &[(String, Vec<PageRef>)]) -> String {
    if groups.is_empty() {
        return String::new();
    }
    let mut out = format!("<div class=\"mw-category-listing\"><h2>{}</h2>\n", html_escape(heading));
    for (letter, members) in groups {
        out.push_str(&format!(
            "<h3 class=\"mw-category-group\">{}</h3>\n<ul>\n",
            html_escape(letter)
        ));
        for member in members {
            out.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>\n",
                encode_article_id(&member.title),
                html_escape(&member.title.replace('_', " "))
            ));
        }
        out.push_str("</ul>\n");
    }
    out.push_str("</div>");
    out
}

/// Previous/next links between shards of a paginated category.
pub fn shard_navigation(prev: Option<&str>, next: Option<&str>) -> String {
    if prev.is_none() && next.is_none() {
        return String::new();
    }
    let mut out = String::from("<div class=\"mw-category-pagination\">");
    if let Some(prev) = prev {
        out.push_str(&format!(
            "<a rel=\"prev\" href=\"{}\">&#8592; previous</a> ",
            encode_article_id(prev)
        ));
    }
    if let Some(next) = next {
        out.push_str(&format!(
            "<a rel=\"next\" href=\"{}\">next &#8594;</a>",
            encode_article_id(next)
        ));
    }
    out.push_str("</div>");
    out
}

/// Subpage breadcrumb for ids with `/` in a subpage-enabled namespace.
pub fn subpage_breadcrumb(article_id: &str) -> String {
    let parts: Vec<&str> = article_id.split('/').collect();
    if parts.len() < 2 {
        return String::new();
    }
    let mut out = String::from("<div class=\"subpages\">&lt; ");
    for (i, part) in parts[..parts.len() - 1].iter().enumerate() {
        if i > 0 {
            out.push_str(" | ");
        }
        // An ancestor at depth i sits (len-1-i) directories up, under its
        // own final path segment.
        out.push_str(&format!(
            "<a href=\"{}{}\">{}</a>",
            "../".repeat(parts.len() - 1 - i),
            encode_article_id(part),
            html_escape(&part.replace('_', " "))
        ));
    }
    out.push_str("</div>");
    out
}

/// Article footer, fenced so offline indexers skip it.
pub fn footer(creator: &str, date: &str, source_url: &str) -> String {
    format!(
        "<!--htdig_noindex--><div id=\"mw-footer\"><hr/>\
         <p>{} - {date} - <a href=\"{source_url}\">{source_url}</a></p>\
         </div><!--/htdig_noindex-->",
        html_escape(creator)
    )
}

/// The document shell every rewritten article is merged into.
pub fn page_shell(
    title: &str,
    direction: &str,
    head_extra: &str,
    body_class: &str,
    body: &str,
) -> String {
    format!(
        "<!DOCTYPE html>\n<html dir=\"{direction}\">\n<head>\n<meta charset=\"UTF-8\"/>\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\"/>\n\
         <title>{}</title>\n{head_extra}</head>\n<body class=\"{body_class}\">\n{body}\n</body>\n</html>",
        html_escape(title)
    )
}

/// Stylesheet link tag relative to the archive root.
pub fn css_link(root: &str, name: &str) -> String {
    format!("<link rel=\"stylesheet\" href=\"{root}-/{name}\"/>\n")
}

/// Script tag relative to the archive root.
pub fn js_script(root: &str, name: &str) -> String {
    format!("<script src=\"{root}-/{name}\"></script>\n")
}

/// Geolocation meta tag.
pub fn geo_meta(lat: f64, lon: f64) -> String {
    format!("<meta name=\"geo.position\" content=\"{lat};{lon}\"/>\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_opens_the_chain() {
        let html = lead_section("<p>intro</p>");
        assert!(html.contains("__SUB_LEVEL_SECTION_0__"));
        assert!(html.contains("<p>intro</p>"));
    }

    #[test]
    fn test_section_chains_to_next_slot() {
        let html = section("History", "History", "<p>text</p>", 3);
        assert!(html.contains("__SUB_LEVEL_SECTION_3__"));
        assert!(html.contains("<h2 id=\"History\">"));
    }

    #[test]
    fn test_subsection_heading_level_is_capped() {
        let html = subsection("Deep", "Deep", "", 9, 1);
        assert!(html.contains("<h6"));
    }

    #[test]
    fn test_member_listing_groups() {
        let groups = vec![(
            "A".to_string(),
            vec![PageRef::new("Category:Alpha_beta")],
        )];
        let html = member_listing("Subcategories", &groups);
        assert!(html.contains("<h3 class=\"mw-category-group\">A</h3>"));
        assert!(html.contains("href=\"Category%3AAlpha_beta\""));
        assert!(html.contains("Alpha beta"));
    }

    #[test]
    fn test_footer_is_fenced() {
        let html = footer("wikimirror", "2026-08-02", "https://en.wikipedia.org/wiki/X");
        assert!(html.starts_with("<!--htdig_noindex-->"));
        assert!(html.ends_with("<!--/htdig_noindex-->"));
    }

    #[test]
    fn test_breadcrumb_for_nested_id() {
        let html = subpage_breadcrumb("HMS/Beagle/Log");
        assert!(html.contains("href=\"../../HMS\""), "{html}");
        assert!(html.contains("href=\"../Beagle\""), "{html}");
        assert_eq!(subpage_breadcrumb("Plain"), "");
    }
}
