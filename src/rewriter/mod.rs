//! The document rewrite pipeline.
//!
//! Three passes run in order over one parsed document: media treatment,
//! link rewriting, structural cleanup. The rewritten body is then merged
//! into the page shell with its module references, breadcrumb, and
//! footer. The pass order matters: media relies on Parsoid attributes
//! that cleanup scrubs at the end.

mod cleanup;
mod dom;
mod links;
mod media;

pub use cleanup::CleanupContext;
pub use links::{geo_rewrite, href_to_title, link_targets, LinkContext, LinkResolution};
pub use media::MediaContext;

use regex::Regex;
use scraper::Html;

use crate::config::ScrapeConfig;
use crate::models::{ArticleDetail, FileTask, WikiMetadata};
use crate::templates;
use crate::utils::relative_root_for;

/// Everything the rewrite of one article needs to know.
pub struct RewriteContext<'a> {
    pub article_id: &'a str,
    pub display_title: &'a str,
    pub detail: &'a ArticleDetail,
    pub metadata: &'a WikiMetadata,
    pub config: &'a ScrapeConfig,
    pub links: &'a LinkResolution,
    pub namespace_for: &'a (dyn Fn(&str) -> char + Sync),
    /// Archive-local script names injected into the head, in order.
    pub js_names: &'a [String],
    /// Archive-local stylesheet names injected into the head, in order.
    pub css_names: &'a [String],
}

pub struct RewriteOutput {
    pub html: String,
    pub media: Vec<FileTask>,
}

/// Run all three passes and merge the result into the page shell.
pub fn rewrite_article(body_html: &str, ctx: &RewriteContext<'_>) -> RewriteOutput {
    let mut doc = Html::parse_document(body_html);
    let mut tasks = Vec::new();

    let media_ctx = MediaContext {
        article_id: ctx.article_id,
        wiki_base: &ctx.metadata.base_url,
        formats: ctx.config.formats,
        text_direction: ctx.metadata.text_direction,
        links: ctx.links,
    };
    media::treat_medias(&mut doc, &media_ctx, &mut tasks);

    let link_ctx = LinkContext {
        article_id: ctx.article_id,
        wiki_base: &ctx.metadata.base_url,
        links: ctx.links,
        namespace_for: ctx.namespace_for,
    };
    links::rewrite_links(&mut doc, &link_ctx);

    let cleanup_ctx = CleanupContext {
        formats: ctx.config.formats,
        lists: &ctx.config.dom,
        keep_empty_sections: ctx.config.keep_empty_sections,
    };
    cleanup::cleanup(&mut doc, &cleanup_ctx);

    let body = dom::body_inner_html(&doc);
    let html = finalize(&body, ctx);
    RewriteOutput { html, media: tasks }
}

/// Merge the rewritten body into the document shell.
fn finalize(body: &str, ctx: &RewriteContext<'_>) -> String {
    let root = relative_root_for(ctx.article_id);

    let mut head_extra = String::new();
    for name in ctx.css_names {
        head_extra.push_str(&templates::css_link(&root, name));
    }
    for name in ctx.js_names {
        head_extra.push_str(&templates::js_script(&root, name));
    }
    if let Some((lat, lon)) = ctx.detail.coordinates {
        head_extra.push_str(&templates::geo_meta(lat, lon));
    }

    let mut full_body = String::new();
    if allows_subpage_breadcrumb(ctx) {
        full_body.push_str(&templates::subpage_breadcrumb(ctx.article_id));
    }
    full_body.push_str(body);

    let source_url = format!(
        "{}wiki/{}",
        ctx.metadata.base_url,
        crate::utils::encode_article_id(ctx.article_id)
    );
    let creator = ctx
        .config
        .creator
        .clone()
        .unwrap_or_else(|| ctx.metadata.site_name.clone());
    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    full_body.push_str(&templates::footer(&creator, &date, &source_url));

    let html = templates::page_shell(
        ctx.display_title,
        ctx.metadata.text_direction.as_str(),
        &head_extra,
        "mw-body",
        &full_body,
    );
    if ctx.config.minify {
        minify_html(&html)
    } else {
        html
    }
}

/// Breadcrumbs appear only for subpage ids in namespaces that allow them.
fn allows_subpage_breadcrumb(ctx: &RewriteContext<'_>) -> bool {
    if !ctx.article_id.contains('/') {
        return false;
    }
    match ctx.metadata.namespace_of(ctx.article_id) {
        Some(ns) => ns.allows_subpages,
        None => ctx
            .metadata
            .namespaces
            .get("")
            .map(|ns| ns.allows_subpages)
            .unwrap_or(false),
    }
}

/// Conservative minification: drop comments (keeping the htdig index
/// fences) and collapse inter-tag whitespace. Documents containing
/// `<pre>` only lose comments.
pub fn minify_html(html: &str) -> String {
    let comment_re = Regex::new(r"(?s)<!--.*?-->").expect("static regex");
    let without_comments = comment_re.replace_all(html, |caps: &regex::Captures<'_>| {
        let comment = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        if comment.starts_with("<!--htdig") || comment.starts_with("<!--/htdig") {
            comment.to_string()
        } else {
            String::new()
        }
    });
    if without_comments.contains("<pre") {
        return without_comments.into_owned();
    }
    let between_tags = Regex::new(r">\s+<").expect("static regex");
    between_tags.replace_all(&without_comments, "> <").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Namespace, TextDirection};
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;

    fn metadata() -> WikiMetadata {
        let mut meta = WikiMetadata {
            base_url: "https://en.wikipedia.org/".to_string(),
            site_name: "Wikipedia".to_string(),
            text_direction: TextDirection::Ltr,
            ..Default::default()
        };
        meta.register_namespace(Namespace {
            id: 14,
            canonical: "Category".into(),
            localized: "Category".into(),
            is_content: false,
            allows_subpages: false,
        });
        meta
    }

    fn ns_for(_title: &str) -> char {
        'A'
    }

    fn rewrite(body: &str, links: &LinkResolution) -> RewriteOutput {
        let meta = metadata();
        let detail = ArticleDetail::new("London");
        let cfg = ScrapeConfig::new(
            "https://en.wikipedia.org",
            "ops@example.org",
            PathBuf::from("/tmp/out"),
        );
        let ctx = RewriteContext {
            article_id: "London",
            display_title: "London",
            detail: &detail,
            metadata: &meta,
            config: &cfg,
            links,
            namespace_for: &ns_for,
            js_names: &["mw/startup.js".to_string()],
            css_names: &["s/style.css".to_string()],
        };
        rewrite_article(body, &ctx)
    }

    fn no_links() -> LinkResolution {
        LinkResolution {
            mirrored: HashSet::new(),
            redirects: HashMap::new(),
        }
    }

    #[test]
    fn test_full_rewrite_produces_document() {
        let mut links = no_links();
        links.mirrored.insert("Paris".to_string());
        let output = rewrite(
            "<p><a rel=\"mw:WikiLink\" href=\"./Paris\">Paris</a>\
             <img src=\"https://u.org/a/ab/X.png\"/></p>",
            &links,
        );
        assert!(output.html.starts_with("<!DOCTYPE html>"));
        assert!(output.html.contains("<title>London</title>"));
        assert!(output.html.contains("dir=\"ltr\""));
        assert!(output.html.contains("href=\"../A/Paris\""));
        assert!(output.html.contains("src=\"../I/X.png\""));
        assert!(output.html.contains("../s/style.css"));
        assert!(output.html.contains("../mw/startup.js"));
        assert!(output.html.contains("htdig_noindex"));
        assert_eq!(output.media.len(), 1);
        assert_eq!(output.media[0].path, "X.png");
    }

    #[test]
    fn test_rewrite_is_idempotent_at_dom_level() {
        let links = no_links();
        let first = rewrite("<p><span typeof=\"mw:Transclusion\">x</span></p>", &links);
        // Extract the body from the produced document and rewrite again:
        // all scrubs already applied, so the body survives unchanged.
        let body_start = first.html.find("<body").expect("body");
        let body = &first.html[body_start..];
        let body_inner = &body[body.find('>').expect("gt") + 1
            ..body.find("<!--htdig_noindex-->").expect("footer")];
        let second = rewrite(body_inner, &links);
        let second_start = second.html.find("<body").expect("body");
        let second_body = &second.html[second_start..];
        let second_inner = &second_body[second_body.find('>').expect("gt") + 1
            ..second_body.find("<!--htdig_noindex-->").expect("footer")];
        assert_eq!(body_inner.trim(), second_inner.trim());
    }

    #[test]
    fn test_minify_preserves_htdig_fences() {
        let html = "<p>a</p>  \n  <!-- drop me --><!--htdig_noindex--><p>b</p><!--/htdig_noindex-->";
        let min = minify_html(html);
        assert!(!min.contains("drop me"));
        assert!(min.contains("<!--htdig_noindex-->"));
        assert!(min.contains("<!--/htdig_noindex-->"));
        assert!(min.contains("</p> <"));
    }

    #[test]
    fn test_minify_spares_pre_blocks() {
        let html = "<pre>  spaced   out  </pre>\n<p>x</p>";
        let min = minify_html(html);
        assert!(min.contains("  spaced   out  "));
    }

    #[test]
    fn test_geo_meta_injected() {
        let meta = metadata();
        let mut detail = ArticleDetail::new("Paris");
        detail.coordinates = Some((48.85, 2.35));
        let cfg = ScrapeConfig::new(
            "https://en.wikipedia.org",
            "ops@example.org",
            PathBuf::from("/tmp/out"),
        );
        let links = no_links();
        let ctx = RewriteContext {
            article_id: "Paris",
            display_title: "Paris",
            detail: &detail,
            metadata: &meta,
            config: &cfg,
            links: &links,
            namespace_for: &ns_for,
            js_names: &[],
            css_names: &[],
        };
        let output = rewrite_article("<p>x</p>", &ctx);
        assert!(output.html.contains("geo.position"));
        assert!(output.html.contains("48.85;2.35"));
    }
}
