//! Normalization of query API responses.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::{
    ensure_trailing_slash, ArticleDetail, MergeProps, Namespace, PageRef, Revision, TextDirection,
    Thumbnail, WikiMetadata,
};

/// Replace spaces with the run's space delimiter.
pub fn normalize_title(title: &str, delimiter: &str) -> String {
    title.replace(' ', delimiter)
}

/// Re-key `query.pages` by normalized title and merge each page into the
/// accumulated details, dropping entries marked `missing`.
pub fn merge_query_pages(
    response: &Value,
    delimiter: &str,
    props: MergeProps,
    details: &mut HashMap<String, ArticleDetail>,
) {
    let Some(pages) = response
        .get("query")
        .and_then(|q| q.get("pages"))
        .and_then(|p| p.as_object())
    else {
        return;
    };
    for page in pages.values() {
        if page.get("missing").is_some() {
            continue;
        }
        let Some((title, parsed)) = parse_page(page, delimiter) else {
            continue;
        };
        details
            .entry(title.clone())
            .or_insert_with(|| ArticleDetail::new(title))
            .merge(parsed, props);
    }
}

/// Parse one `query.pages` entry.
pub fn parse_page(page: &Value, delimiter: &str) -> Option<(String, ArticleDetail)> {
    let title = normalize_title(page.get("title")?.as_str()?, delimiter);
    let mut detail = ArticleDetail::new(title.clone());
    detail.page_id = page.get("pageid").and_then(|v| v.as_u64()).unwrap_or(0);
    detail.namespace = page.get("ns").and_then(|v| v.as_i64()).unwrap_or(0) as i32;

    if let Some(revisions) = page.get("revisions").and_then(|v| v.as_array()) {
        detail.revisions = revisions
            .iter()
            .filter_map(|r| r.get("revid").and_then(|v| v.as_u64()))
            .map(|revid| Revision { revid })
            .collect();
    }
    if let Some(coord) = page
        .get("coordinates")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
    {
        if let (Some(lat), Some(lon)) = (
            coord.get("lat").and_then(|v| v.as_f64()),
            coord.get("lon").and_then(|v| v.as_f64()),
        ) {
            detail.coordinates = Some((lat, lon));
        }
    }
    detail.redirects = parse_refs(page.get("redirects"), delimiter);
    detail.categories = parse_refs(page.get("categories"), delimiter);
    if let Some(thumb) = page.get("thumbnail") {
        if let Some(source) = thumb.get("source").and_then(|v| v.as_str()) {
            detail.thumbnail = Some(Thumbnail {
                source: source.to_string(),
                width: thumb.get("width").and_then(|v| v.as_u64()).map(|w| w as u32),
                height: thumb.get("height").and_then(|v| v.as_u64()).map(|h| h as u32),
            });
        }
    }
    Some((title, detail))
}

/// Parse a list of `{title}` objects into page references.
pub fn parse_refs(value: Option<&Value>, delimiter: &str) -> Vec<PageRef> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let title = item.get("title")?.as_str()?;
                    Some(PageRef {
                        title: normalize_title(title, delimiter),
                        pageid: item.get("pageid").and_then(|v| v.as_u64()),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// The forward redirect reported by a `&redirects` query, if any.
///
/// Only the first hop is taken; chains are not followed.
pub fn parse_forward_redirect(response: &Value, delimiter: &str) -> Option<String> {
    response
        .get("query")
        .and_then(|q| q.get("redirects"))
        .and_then(|r| r.as_array())
        .and_then(|redirects| redirects.first())
        .and_then(|redirect| redirect.get("to"))
        .and_then(|v| v.as_str())
        .map(|target| normalize_title(target, delimiter))
}

/// Build the immutable site description from a siteinfo response.
pub fn parse_siteinfo(
    response: &Value,
    wiki_url: &str,
    delimiter: &str,
) -> Option<WikiMetadata> {
    let query = response.get("query")?;
    let general = query.get("general")?;

    let origin = {
        let parsed = url::Url::parse(wiki_url).ok()?;
        format!("{}://{}", parsed.scheme(), parsed.host_str()?)
    };
    let script_path = general
        .get("scriptpath")
        .and_then(|v| v.as_str())
        .unwrap_or("/w");

    let mut meta = WikiMetadata {
        base_url: ensure_trailing_slash(wiki_url),
        api_url: format!("{origin}{script_path}/api.php/"),
        rest_url: format!("{}api/rest_v1/", ensure_trailing_slash(wiki_url)),
        ve_url: format!("{origin}{script_path}/api.php/"),
        main_page: general
            .get("mainpage")
            .and_then(|v| v.as_str())
            .map(|t| normalize_title(t, delimiter))
            .unwrap_or_else(|| "Main_Page".to_string()),
        text_direction: if general.get("rtl").is_some() {
            TextDirection::Rtl
        } else {
            TextDirection::Ltr
        },
        lang_iso2: general
            .get("lang")
            .and_then(|v| v.as_str())
            .unwrap_or("en")
            .to_string(),
        site_name: general
            .get("sitename")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        article_count: query
            .get("statistics")
            .and_then(|s| s.get("articles"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        ..Default::default()
    };
    meta.fill_iso3();

    if let Some(namespaces) = query.get("namespaces").and_then(|v| v.as_object()) {
        for ns in namespaces.values() {
            let Some(id) = ns.get("id").and_then(|v| v.as_i64()) else {
                continue;
            };
            let record = Namespace {
                id: id as i32,
                canonical: ns
                    .get("canonical")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                localized: ns
                    .get("*")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                is_content: ns.get("content").is_some(),
                allows_subpages: ns.get("subpages").is_some(),
            };
            meta.register_namespace(record);
        }
    }
    if let Some(aliases) = query.get("namespacealiases").and_then(|v| v.as_array()) {
        for alias in aliases {
            let (Some(id), Some(name)) = (
                alias.get("id").and_then(|v| v.as_i64()),
                alias.get("*").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            // Find the already-registered record for this id.
            if let Some(record) = meta.namespaces.values().find(|ns| ns.id == id as i32).cloned() {
                meta.register_alias(name, record);
            }
        }
    }
    Some(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_drops_missing_pages() {
        let response = json!({
            "query": { "pages": {
                "-1": { "title": "Nope", "missing": "" },
                "42": { "title": "London Bridge", "pageid": 42, "ns": 0,
                        "revisions": [{ "revid": 7 }] }
            }}
        });
        let mut details = HashMap::new();
        merge_query_pages(&response, "_", MergeProps::all(), &mut details);
        assert_eq!(details.len(), 1);
        let detail = details.get("London_Bridge").expect("rekeyed by title");
        assert_eq!(detail.revision_id(), Some(7));
    }

    #[test]
    fn test_parse_page_coordinates_and_thumbnail() {
        let page = json!({
            "title": "Paris", "pageid": 1, "ns": 0,
            "coordinates": [{ "lat": 48.85, "lon": 2.35 }],
            "thumbnail": { "source": "https://u.org/p.jpg", "width": 50, "height": 40 }
        });
        let (_, detail) = parse_page(&page, "_").expect("parses");
        assert_eq!(detail.coordinates, Some((48.85, 2.35)));
        assert_eq!(detail.thumbnail.expect("thumb").width, Some(50));
    }

    #[test]
    fn test_parse_forward_redirect() {
        let response = json!({
            "query": {
                "redirects": [{ "from": "Main Page", "to": "Home Page" }],
                "pages": { "1": { "title": "Home Page", "pageid": 1 } }
            }
        });
        assert_eq!(
            parse_forward_redirect(&response, "_").as_deref(),
            Some("Home_Page")
        );
        assert_eq!(parse_forward_redirect(&json!({ "query": {} }), "_"), None);
    }

    #[test]
    fn test_parse_siteinfo() {
        let response = json!({
            "query": {
                "general": {
                    "mainpage": "Main Page", "sitename": "Wikipedia",
                    "lang": "en", "scriptpath": "/w"
                },
                "statistics": { "articles": 1234 },
                "namespaces": {
                    "0": { "id": 0, "*": "", "content": "" },
                    "14": { "id": 14, "*": "Category", "canonical": "Category" }
                },
                "namespacealiases": [ { "id": 14, "*": "CAT" } ]
            }
        });
        let meta =
            parse_siteinfo(&response, "https://en.wikipedia.org", "_").expect("parses");
        assert_eq!(meta.main_page, "Main_Page");
        assert_eq!(meta.api_url, "https://en.wikipedia.org/w/api.php/");
        assert_eq!(meta.lang_iso3, "eng");
        assert_eq!(meta.article_count, 1234);
        assert_eq!(meta.namespaces.get("CAT").map(|ns| ns.id), Some(14));
        assert_eq!(meta.namespaces.get("cat").map(|ns| ns.id), Some(14));
    }
}
