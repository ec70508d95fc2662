//! Link rewriting over `<a>` and `<area>` elements.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use super::dom;
use crate::utils::{encode_article_id, relative_root_for};

/// Store lookups resolved ahead of the synchronous rewrite.
#[derive(Debug, Default, Clone)]
pub struct LinkResolution {
    /// Titles present in the article store.
    pub mirrored: HashSet<String>,
    /// Redirect sources whose target is mirrored.
    pub redirects: HashMap<String, String>,
}

impl LinkResolution {
    /// A link target survives when it is mirrored directly or through a
    /// redirect.
    pub fn is_reachable(&self, title: &str) -> bool {
        self.mirrored.contains(title) || self.redirects.contains_key(title)
    }

    /// The archive id the title resolves to, following one redirect hop.
    pub fn resolve<'a>(&'a self, title: &'a str) -> Option<&'a str> {
        if self.mirrored.contains(title) {
            return Some(title);
        }
        self.redirects.get(title).map(|s| s.as_str())
    }
}

pub struct LinkContext<'a> {
    pub article_id: &'a str,
    /// `https://host/` origin used to absolutise rooted external paths.
    pub wiki_base: &'a str,
    pub links: &'a LinkResolution,
    /// Maps a title to the archive namespace its entry lives in.
    pub namespace_for: &'a (dyn Fn(&str) -> char + Sync),
}

/// Extract every candidate article title referenced by links; the caller
/// resolves them against the stores before the rewrite runs.
pub fn link_targets(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("a[href], area[href]").expect("static selector");
    let mut titles: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for element in doc.select(&selector) {
        if let Some(title) = element.value().attr("href").and_then(href_to_title) {
            if seen.insert(title.clone()) {
                titles.push(title);
            }
        }
    }
    titles
}

/// Schemes that can never name an article.
const NON_ARTICLE_SCHEMES: [&str; 6] = ["geo:", "mailto:", "tel:", "javascript:", "ftp:", "news:"];

/// Turn an article href into a store title, or `None` for non-article
/// URLs. Handles Parsoid `./Title`, rooted `/wiki/Title`, and bare
/// relative forms; fragments are dropped and spaces normalised.
/// Archive-local paths (`../…`) are already rewritten and stay as-is.
pub fn href_to_title(href: &str) -> Option<String> {
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") || href.starts_with("//") {
        return None;
    }
    if href.starts_with("../") || NON_ARTICLE_SCHEMES.iter().any(|s| href.starts_with(s)) {
        return None;
    }
    let path = href.split('#').next().unwrap_or(href);
    let title = path
        .strip_prefix("./")
        .or_else(|| path.strip_prefix("/wiki/"))
        .unwrap_or(path);
    if title.is_empty() || title.contains("://") {
        return None;
    }
    let decoded = urlencoding::decode(title)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| title.to_string());
    Some(decoded.replace(' ', "_"))
}

/// What to do with one link.
#[derive(Debug, PartialEq)]
enum LinkAction {
    Delete,
    Keep,
    MarkExternal,
    Absolutise(String),
    Unwrap,
    Rewrite(String),
}

/// Rewrite every link in the document.
pub fn rewrite_links(doc: &mut Html, ctx: &LinkContext<'_>) {
    let selector = Selector::parse("a, area").expect("static selector");
    for id in dom::select_ids(doc, &selector) {
        if !dom::is_attached(doc, id) {
            continue;
        }
        let action = decide(doc, id, ctx);
        match action {
            LinkAction::Delete => dom::detach(doc, id),
            LinkAction::Keep => {}
            LinkAction::MarkExternal => dom::add_class(doc, id, "external"),
            LinkAction::Absolutise(href) | LinkAction::Rewrite(href) => {
                dom::set_attr(doc, id, "href", &href)
            }
            LinkAction::Unwrap => dom::unwrap_node(doc, id),
        }
    }
}

fn decide(doc: &Html, id: ego_tree::NodeId, ctx: &LinkContext<'_>) -> LinkAction {
    let Some(href) = dom::get_attr(doc, id, "href") else {
        return LinkAction::Delete;
    };
    if href.is_empty() {
        return LinkAction::Delete;
    }
    if href.starts_with('#') {
        return LinkAction::Keep;
    }
    if let Some(geo) = geo_rewrite(&href) {
        return LinkAction::Rewrite(geo);
    }

    match dom::get_attr(doc, id, "rel") {
        Some(rel) if rel.contains("mw:WikiLink/Interwiki") => LinkAction::MarkExternal,
        Some(rel) if rel.contains("mw:ExtLink") || rel.contains("nofollow") => {
            if let Some(rooted) = href.strip_prefix('/') {
                LinkAction::Absolutise(format!(
                    "{}/{rooted}",
                    ctx.wiki_base.trim_end_matches('/')
                ))
            } else if href.starts_with("./") {
                LinkAction::Unwrap
            } else {
                LinkAction::Keep
            }
        }
        Some(rel) if rel.contains("mw:WikiLink") || rel.contains("mw:referencedBy") => {
            article_link_action(&href, ctx)
        }
        Some(_) => LinkAction::Keep,
        // MediaWiki-native HTML carries no rel; same decision tree.
        None => {
            if href.starts_with("http://") || href.starts_with("https://") || href.starts_with("//")
            {
                LinkAction::Keep
            } else {
                article_link_action(&href, ctx)
            }
        }
    }
}

/// The mirrored / redirect / unwrap decision, preserving any fragment.
fn article_link_action(href: &str, ctx: &LinkContext<'_>) -> LinkAction {
    let Some(title) = href_to_title(href) else {
        return LinkAction::Keep;
    };
    let fragment = href
        .split_once('#')
        .map(|(_, f)| format!("#{f}"))
        .unwrap_or_default();

    match ctx.links.resolve(&title) {
        Some(target) => {
            let namespace = (ctx.namespace_for)(target);
            debug!("link {title} -> {namespace}/{target}");
            LinkAction::Rewrite(format!(
                "{}{namespace}/{}{fragment}",
                relative_root_for(ctx.article_id),
                encode_article_id(target)
            ))
        }
        None => LinkAction::Unwrap,
    }
}

/// Degrees/minutes/seconds conversion factors.
const DMS_FACTORS: [f64; 3] = [1.0, 60.0, 3600.0];

static GEOHACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"geohack\.php\?.*params=([^&]+)").expect("static regex"));
static POIMAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"poimap2\.php\?.*?lat=(-?[0-9.]+).*?lon=(-?[0-9.]+)").expect("static regex")
});
static OSM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"openstreetmap\.org.*?mlat=(-?[0-9.]+).*?mlon=(-?[0-9.]+)").expect("static regex")
});

/// Rewrite the recognised geo URL shapes to a `geo:` URI.
pub fn geo_rewrite(href: &str) -> Option<String> {
    if let Some(caps) = GEOHACK_RE.captures(href) {
        let raw = urlencoding::decode(&caps[1])
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| caps[1].to_string());
        let (lat, lon) = parse_geohack_params(&raw)?;
        return Some(format!("geo:{lat},{lon}"));
    }

    if let Some(caps) = POIMAP_RE.captures(href) {
        return Some(format!("geo:{},{}", &caps[1], &caps[2]));
    }

    if let Some(caps) = OSM_RE.captures(href) {
        return Some(format!("geo:{},{}", &caps[1], &caps[2]));
    }
    None
}

/// Parse the `params=` blob: either `lat;lon` decimal degrees or
/// underscore-separated DMS tokens with N/S/E/W/O markers.
fn parse_geohack_params(params: &str) -> Option<(f64, f64)> {
    if params.contains(';') {
        let mut parts = params.split(';');
        let lat: f64 = parts.next()?.trim().parse().ok()?;
        let lon: f64 = parts.next()?.trim().split('_').next()?.parse().ok()?;
        return Some((lat, lon));
    }

    let mut coords: Vec<f64> = Vec::new();
    let mut acc = 0.0;
    let mut index = 0usize;
    for token in params.split('_') {
        if let Ok(value) = token.parse::<f64>() {
            if index < DMS_FACTORS.len() {
                acc += value / DMS_FACTORS[index];
                index += 1;
            }
            continue;
        }
        let sign = match token {
            "N" | "E" | "O" => 1.0,
            "S" | "W" => -1.0,
            // Trailing qualifiers (type:, region:) end the coordinates.
            _ => break,
        };
        coords.push(sign * acc);
        acc = 0.0;
        index = 0;
        if coords.len() == 2 {
            break;
        }
    }
    if coords.len() == 2 {
        Some((coords[0], coords[1]))
    } else {
        None
    }
}
