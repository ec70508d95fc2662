//! Article rendering: upstream JSON to HTML fragments.
//!
//! Three upstream shapes feed this module: REST mobile-sections, visual
//! editor HTML, and the desktop parse/pagebundle fallback. Oversized
//! category listings additionally split into shards linked by id.

use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, ScrapeError};
use crate::models::{ArticleDetail, PageRef};
use crate::templates;
use crate::utils::group_letter;

/// Sub-category entries per shard of a paginated category article.
pub const CATEGORY_PAGE_SIZE: usize = 200;

/// One renderable article; a paginated category yields several.
#[derive(Debug, Clone)]
pub struct RenderedArticle {
    pub id: String,
    pub html: String,
    pub display_title: String,
    pub detail: ArticleDetail,
}

/// One mobile-sections section entry.
#[derive(Debug, Clone)]
struct MobileSection {
    toclevel: u32,
    anchor: String,
    line: String,
    text: String,
}

/// Render one article's upstream response into one or more fragments.
///
/// The desktop path serves the main page and every article when REST is
/// unavailable; the mobile path assembles the section chain.
pub fn render(
    article_id: &str,
    detail: &ArticleDetail,
    response: &Value,
    is_main_page: bool,
    rest_available: bool,
) -> Result<Vec<RenderedArticle>> {
    let body = if is_main_page || !rest_available {
        render_desktop(article_id, response)?
    } else {
        render_mobile_sections(article_id, response)?
    };

    let display_title = extract_display_title(&body, response, article_id);

    let shards = paginate_category(article_id, detail);
    let rendered = shards
        .into_iter()
        .enumerate()
        .map(|(index, shard)| {
            let shard_id = shard_id(article_id, index);
            let mut html = if index == 0 {
                body.clone()
            } else {
                // Continuation shards repeat only the listing, not the
                // article body.
                String::new()
            };
            html.push_str(&category_listing_html(&shard));
            html.push_str(&templates::shard_navigation(
                shard.prev_article_id.as_deref(),
                shard.next_article_id.as_deref(),
            ));
            RenderedArticle {
                id: shard_id,
                html,
                display_title: display_title.clone(),
                detail: shard,
            }
        })
        .collect();
    Ok(rendered)
}

/// Desktop rendering: visual editor content, then `parse.text['*']`,
/// then pagebundle `html.body`.
fn render_desktop(article_id: &str, response: &Value) -> Result<String> {
    if let Some(content) = response
        .get("visualeditor")
        .and_then(|ve| ve.get("content"))
        .and_then(|v| v.as_str())
    {
        return Ok(content.to_string());
    }
    if let Some(text) = response
        .get("parse")
        .and_then(|p| p.get("text"))
        .and_then(|t| t.get("*"))
        .and_then(|v| v.as_str())
    {
        return Ok(text.to_string());
    }
    if let Some(body) = response
        .get("html")
        .and_then(|h| h.get("body"))
        .and_then(|v| v.as_str())
    {
        return Ok(body.to_string());
    }
    Err(ScrapeError::Render {
        article: article_id.to_string(),
        reason: "no renderable payload in response".to_string(),
    })
}

/// Mobile path: lead section plus the ordered `remaining.sections` walk.
fn render_mobile_sections(article_id: &str, response: &Value) -> Result<String> {
    let lead = response.get("lead").ok_or_else(|| ScrapeError::Render {
        article: article_id.to_string(),
        reason: "mobile-sections response missing lead".to_string(),
    })?;
    let lead_html = lead
        .get("sections")
        .and_then(|s| s.as_array())
        .and_then(|a| a.first())
        .and_then(|s| s.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let sections = parse_sections(response);
    let mut html = templates::lead_section(lead_html);

    for (i, section) in sections.iter().enumerate() {
        let placeholder = templates::section_placeholder(i);
        if section.toclevel <= 1 {
            html = html.replace(&placeholder, "");
            html.push_str(&templates::section(
                &section.anchor,
                &section.line,
                &section.text,
                i + 1,
            ));
        } else {
            html = html.replace(
                &placeholder,
                &templates::subsection(
                    &section.anchor,
                    &section.line,
                    &section.text,
                    section.toclevel,
                    i + 1,
                ),
            );
        }
    }
    // Clear the trailing anchor left by the last section (or the lead).
    html = html.replace(&templates::section_placeholder(sections.len()), "");
    Ok(html)
}

fn parse_sections(response: &Value) -> Vec<MobileSection> {
    response
        .get("remaining")
        .and_then(|r| r.get("sections"))
        .and_then(|s| s.as_array())
        .map(|sections| {
            sections
                .iter()
                .map(|s| MobileSection {
                    toclevel: s.get("toclevel").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
                    anchor: s
                        .get("anchor")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    line: s
                        .get("line")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    text: s
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Document `<title>`, then the lead's `displaytitle`, then the id.
fn extract_display_title(body: &str, response: &Value, article_id: &str) -> String {
    let doc = Html::parse_document(body);
    let title_selector = Selector::parse("title").expect("static selector");
    if let Some(title) = doc.select(&title_selector).next() {
        let text: String = title.text().collect();
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(display) = response
        .get("lead")
        .and_then(|l| l.get("displaytitle"))
        .and_then(|v| v.as_str())
    {
        if !display.is_empty() {
            return display.to_string();
        }
    }
    article_id.replace('_', " ")
}

fn shard_id(article_id: &str, index: usize) -> String {
    if index == 0 {
        article_id.to_string()
    } else {
        format!("{article_id}__{index}")
    }
}

/// Split an oversized category into shards of [`CATEGORY_PAGE_SIZE`]
/// sub-categories, linked through prev/next ids.
fn paginate_category(article_id: &str, detail: &ArticleDetail) -> Vec<ArticleDetail> {
    let total = detail.sub_categories.len();
    if total <= CATEGORY_PAGE_SIZE {
        return vec![detail.clone()];
    }
    let shard_count = total.div_ceil(CATEGORY_PAGE_SIZE);
    debug!("splitting {article_id} into {shard_count} shards ({total} subcategories)");

    (0..shard_count)
        .map(|index| {
            let start = index * CATEGORY_PAGE_SIZE;
            let end = (start + CATEGORY_PAGE_SIZE).min(total);
            let mut shard = detail.clone();
            shard.sub_categories = detail.sub_categories[start..end].to_vec();
            // Sub-pages render on the first shard only.
            if index > 0 {
                shard.pages = Vec::new();
            }
            shard.prev_article_id = (index > 0).then(|| shard_id(article_id, index - 1));
            shard.next_article_id =
                (index + 1 < shard_count).then(|| shard_id(article_id, index + 1));
            shard
        })
        .collect()
}

/// Listing markup for one shard: grouped sub-categories then sub-pages.
fn category_listing_html(detail: &ArticleDetail) -> String {
    let mut out = String::new();
    if !detail.sub_categories.is_empty() {
        out.push_str(&templates::member_listing(
            "Subcategories",
            &group_members(&detail.sub_categories),
        ));
    }
    if !detail.pages.is_empty() {
        out.push_str(&templates::member_listing(
            "Pages",
            &group_members(&detail.pages),
        ));
    }
    out
}

/// Group members by upper-cased first character, preserving member order
/// within each group.
fn group_members(members: &[PageRef]) -> Vec<(String, Vec<PageRef>)> {
    let mut groups: Vec<(String, Vec<PageRef>)> = Vec::new();
    for member in members {
        // Group on the display part, not the namespace prefix.
        let name = member
            .title
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(&member.title);
        let letter = group_letter(name);
        match groups.iter_mut().find(|(l, _)| *l == letter) {
            Some((_, list)) => list.push(member.clone()),
            None => groups.push((letter, vec![member.clone()])),
        }
    }
    groups.sort_by(|(a, _), (b, _)| a.cmp(b));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn refs(n: usize) -> Vec<PageRef> {
        (0..n)
            .map(|i| PageRef::new(format!("Category:C{i:04}")))
            .collect()
    }

    fn detail_with_subcats(n: usize) -> ArticleDetail {
        let mut detail = ArticleDetail::new("Category:Container_categories");
        detail.sub_categories = refs(n);
        detail
    }

    #[test]
    fn test_shard_boundaries() {
        let id = "Category:Container_categories";
        assert_eq!(paginate_category(id, &detail_with_subcats(200)).len(), 1);
        assert_eq!(paginate_category(id, &detail_with_subcats(201)).len(), 2);
        assert_eq!(paginate_category(id, &detail_with_subcats(400)).len(), 2);
        assert_eq!(paginate_category(id, &detail_with_subcats(401)).len(), 3);
    }

    #[test]
    fn test_shards_link_to_neighbours() {
        let id = "Category:Container_categories";
        let shards = paginate_category(id, &detail_with_subcats(273));
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].sub_categories.len(), 200);
        assert_eq!(shards[1].sub_categories.len(), 73);
        assert_eq!(
            shards[0].next_article_id.as_deref(),
            Some("Category:Container_categories__1")
        );
        assert!(shards[0].prev_article_id.is_none());
        assert_eq!(
            shards[1].prev_article_id.as_deref(),
            Some("Category:Container_categories")
        );
        assert!(shards[1].next_article_id.is_none());
    }

    #[test]
    fn test_mobile_section_assembly() {
        let response = json!({
            "lead": {
                "displaytitle": "London",
                "sections": [{ "id": 0, "text": "<p>lead text</p>" }]
            },
            "remaining": { "sections": [
                { "id": 1, "toclevel": 1, "anchor": "History", "line": "History",
                  "text": "<p>history</p>" },
                { "id": 2, "toclevel": 2, "anchor": "Roman", "line": "Roman",
                  "text": "<p>roman</p>" },
                { "id": 3, "toclevel": 1, "anchor": "Geography", "line": "Geography",
                  "text": "<p>geo</p>" }
            ]}
        });
        let html = render_mobile_sections("London", &response).expect("renders");
        assert!(html.contains("<p>lead text</p>"));
        assert!(html.contains("<h2 id=\"History\">"));
        assert!(html.contains("<h3 id=\"Roman\">"));
        assert!(html.contains("<h2 id=\"Geography\">"));
        // The subsection nests inside the History section.
        let history = html.find("id=\"History\"").expect("history");
        let roman = html.find("id=\"Roman\"").expect("roman");
        let geography = html.find("id=\"Geography\"").expect("geography");
        assert!(history < roman && roman < geography);
        // All placeholders resolved.
        assert!(!html.contains("__SUB_LEVEL_SECTION_"));
    }

    #[test]
    fn test_desktop_prefers_visualeditor() {
        let response = json!({
            "visualeditor": { "content": "<html><body>ve</body></html>" },
            "parse": { "text": { "*": "parse" } }
        });
        assert_eq!(
            render_desktop("X", &response).expect("renders"),
            "<html><body>ve</body></html>"
        );
    }

    #[test]
    fn test_desktop_fallback_chain() {
        let parse = json!({ "parse": { "text": { "*": "<p>parsed</p>" } } });
        assert_eq!(render_desktop("X", &parse).expect("renders"), "<p>parsed</p>");

        let bundle = json!({ "html": { "body": "<p>bundle</p>" } });
        assert_eq!(render_desktop("X", &bundle).expect("renders"), "<p>bundle</p>");

        assert!(render_desktop("X", &json!({})).is_err());
    }

    #[test]
    fn test_display_title_prefers_document_title() {
        let body = "<html><head><title>London - Wiki</title></head><body></body></html>";
        assert_eq!(
            extract_display_title(body, &json!({}), "London"),
            "London - Wiki"
        );
        assert_eq!(
            extract_display_title(
                "<p>x</p>",
                &json!({ "lead": { "displaytitle": "Fancy" } }),
                "London"
            ),
            "Fancy"
        );
        assert_eq!(
            extract_display_title("<p>x</p>", &json!({}), "New_York"),
            "New York"
        );
    }

    #[test]
    fn test_group_members_by_letter() {
        let members = vec![
            PageRef::new("Category:apple"),
            PageRef::new("Category:Avocado"),
            PageRef::new("Category:banana"),
        ];
        let groups = group_members(&members);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "A");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "B");
    }
}
