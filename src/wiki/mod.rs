//! Typed read access to the remote wiki's query API.

mod continuation;
mod parse;

pub use continuation::{continuation_params, merge_props_for, split_gap_continue};
pub use parse::{normalize_title, parse_forward_redirect, parse_refs, parse_siteinfo};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::downloader::Downloader;
use crate::error::{Result, ScrapeError};
use crate::models::{ArticleDetail, Capabilities, PageRef, WikiMetadata};

/// Props requested for every article detail query.
const DETAIL_PROPS: &str = "revisions|categories|redirects";

/// Members of one category, split by namespace.
#[derive(Debug, Default)]
pub struct CategoryMembers {
    pub sub_categories: Vec<PageRef>,
    pub pages: Vec<PageRef>,
}

/// Everything returned by the per-article module query.
#[derive(Debug, Default)]
pub struct ModuleDependencies {
    pub js: Vec<String>,
    pub css: Vec<String>,
    pub js_config_vars: Option<String>,
}

pub struct WikiClient {
    downloader: Arc<Downloader>,
    api_url: String,
    space_delimiter: String,
    capabilities: Arc<Capabilities>,
}

impl WikiClient {
    pub fn new(
        downloader: Arc<Downloader>,
        api_url: impl Into<String>,
        space_delimiter: impl Into<String>,
        capabilities: Arc<Capabilities>,
    ) -> Self {
        Self {
            downloader,
            api_url: api_url.into(),
            space_delimiter: space_delimiter.into(),
            capabilities,
        }
    }

    fn query_url(&self, params: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}?action=query&format=json",
            self.api_url.trim_end_matches('/')
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    /// Issue one query and apply the shared error and warning policy.
    ///
    /// A `DB_ERROR` code is fatal; any other error is logged and the
    /// partial payload returned. A coordinates warning permanently clears
    /// that capability so later queries stop asking for the prop.
    async fn run_query(&self, url: &str) -> Result<Value> {
        let body = self.downloader.get_json(url).await?;

        if let Some(error) = body.get("error") {
            let code = error
                .get("code")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            let info = error
                .get("info")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if code == "DB_ERROR" {
                return Err(ScrapeError::Api {
                    code: code.to_string(),
                    info: info.to_string(),
                });
            }
            warn!("query API error {code}: {info}");
        }

        if let Some(warnings) = body.get("warnings") {
            if let Some(query_warning) = warnings
                .get("query")
                .and_then(|w| w.get("*"))
                .and_then(|v| v.as_str())
            {
                warn!("query API warning: {query_warning}");
                if query_warning.contains("coordinates") {
                    self.capabilities.set_coordinates(false);
                    debug!("coordinates prop disabled for the rest of the run");
                }
            }
        }
        Ok(body)
    }

    /// The prop list for detail queries, adjusted to probed capabilities.
    fn detail_props(&self, with_thumbnail: bool) -> String {
        let mut props = DETAIL_PROPS.to_string();
        if self.capabilities.coordinates() {
            props.push_str("|coordinates");
        }
        if with_thumbnail {
            props.push_str("|pageimages");
        }
        props
    }

    /// Fetch the site description; issued once at startup.
    pub async fn get_metadata(&self, wiki_url: &str) -> Result<WikiMetadata> {
        let url = self.query_url(&[
            ("meta", "siteinfo"),
            ("siprop", "general|namespaces|namespacealiases|statistics"),
        ]);
        let body = self.run_query(&url).await?;
        parse_siteinfo(&body, wiki_url, &self.space_delimiter).ok_or_else(|| {
            ScrapeError::Api {
                code: "siteinfo".to_string(),
                info: "response missing query.general".to_string(),
            }
        })
    }

    /// Fetch details for a batch of titles, draining every continuation.
    pub async fn get_article_details_by_ids(
        &self,
        ids: &[String],
        with_thumbnail: bool,
    ) -> Result<HashMap<String, ArticleDetail>> {
        let mut details = HashMap::new();
        if ids.is_empty() {
            return Ok(details);
        }
        let titles = ids.join("|");
        let props = self.detail_props(with_thumbnail);
        let base_params: Vec<(&str, &str)> = vec![
            ("prop", props.as_str()),
            ("titles", titles.as_str()),
            ("rdlimit", "max"),
            ("cllimit", "max"),
            ("colimit", "max"),
        ];

        let mut cursors: Option<BTreeMap<String, String>> = None;
        loop {
            let mut params = base_params.clone();
            let cursor_params = cursors.take().unwrap_or_default();
            for (key, value) in &cursor_params {
                params.push((key.as_str(), value.as_str()));
            }
            let url = self.query_url(&params);
            let body = self.run_query(&url).await?;

            let props = merge_props_for(&cursor_params);
            parse::merge_query_pages(&body, &self.space_delimiter, props, &mut details);

            match continuation_params(&body) {
                Some(next) => cursors = Some(next),
                None => break,
            }
        }
        Ok(details)
    }

    /// Enumerate one page of a content namespace.
    ///
    /// Inner prop continuations are drained before returning; the outer
    /// generator cursor is handed back so the caller can resume.
    pub async fn get_article_details_by_namespace(
        &self,
        namespace: i32,
        gap_continue: &str,
    ) -> Result<(HashMap<String, ArticleDetail>, Option<String>)> {
        let mut details = HashMap::new();
        let ns = namespace.to_string();
        let props = self.detail_props(false);
        let base_params: Vec<(&str, &str)> = vec![
            ("generator", "allpages"),
            ("gapnamespace", ns.as_str()),
            ("gapfilterredir", "nonredirects"),
            ("gaplimit", "max"),
            ("prop", props.as_str()),
            ("rdlimit", "max"),
            ("cllimit", "max"),
            ("rawcontinue", "true"),
        ];

        let mut next_gap: Option<String> = None;
        let mut cursors: BTreeMap<String, String> = BTreeMap::new();
        if !gap_continue.is_empty() {
            cursors.insert(
                continuation::GAP_CONTINUE.to_string(),
                gap_continue.to_string(),
            );
        }

        loop {
            let mut params = base_params.clone();
            // The outer cursor stays fixed while inner prop continuations
            // drain; it advances only through the value returned below.
            if !gap_continue.is_empty() {
                params.push((continuation::GAP_CONTINUE, gap_continue));
            }
            let inner: Vec<(String, String)> = cursors
                .iter()
                .filter(|(k, _)| k.as_str() != continuation::GAP_CONTINUE)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, value) in &inner {
                params.push((key.as_str(), value.as_str()));
            }

            let url = self.query_url(&params);
            let body = self.run_query(&url).await?;
            let props = merge_props_for(&cursors);
            parse::merge_query_pages(&body, &self.space_delimiter, props, &mut details);

            match continuation_params(&body) {
                Some(next) => {
                    let (gap, inner) = split_gap_continue(next);
                    if let Some(gap) = gap {
                        next_gap = Some(gap);
                    }
                    if inner.is_empty() {
                        break;
                    }
                    cursors = inner;
                }
                None => break,
            }
        }
        Ok((details, next_gap))
    }

    /// Walk every member of a category, following `cmcontinue`.
    pub async fn get_category_members(&self, title: &str) -> Result<CategoryMembers> {
        let mut members = CategoryMembers::default();
        let mut cm_continue = String::new();
        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("list", "categorymembers"),
                ("cmtitle", title),
                ("cmlimit", "max"),
            ];
            if !cm_continue.is_empty() {
                params.push(("cmcontinue", cm_continue.as_str()));
            }
            let url = self.query_url(&params);
            let body = self.run_query(&url).await?;

            if let Some(items) = body
                .get("query")
                .and_then(|q| q.get("categorymembers"))
                .and_then(|v| v.as_array())
            {
                for item in items {
                    let Some(member_title) = item.get("title").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let reference = PageRef {
                        title: normalize_title(member_title, &self.space_delimiter),
                        pageid: item.get("pageid").and_then(|v| v.as_u64()),
                    };
                    if item.get("ns").and_then(|v| v.as_i64()) == Some(14) {
                        members.sub_categories.push(reference);
                    } else {
                        members.pages.push(reference);
                    }
                }
            }

            match continuation_params(&body)
                .and_then(|mut p| p.remove("cmcontinue"))
            {
                Some(next) => cm_continue = next,
                None => break,
            }
        }
        Ok(members)
    }

    /// Where `title` itself redirects to, one hop only.
    ///
    /// Backlink discovery cannot see a title's own forward redirect once
    /// the title is already stored, so the landing page asks directly.
    pub async fn resolve_forward_redirect(&self, title: &str) -> Result<Option<String>> {
        let url = self.query_url(&[("titles", title), ("redirects", "true")]);
        let body = self.run_query(&url).await?;
        Ok(parse_forward_redirect(&body, &self.space_delimiter))
    }

    /// Titles redirecting to `title`; one page of results per call.
    pub async fn get_backlink_redirects(&self, title: &str) -> Result<Vec<PageRef>> {
        let url = self.query_url(&[
            ("prop", "redirects"),
            ("titles", title),
            ("rdlimit", "max"),
        ]);
        let body = self.run_query(&url).await?;
        let mut redirects = Vec::new();
        if let Some(pages) = body
            .get("query")
            .and_then(|q| q.get("pages"))
            .and_then(|p| p.as_object())
        {
            for page in pages.values() {
                redirects.extend(parse_refs(page.get("redirects"), &self.space_delimiter));
            }
        }
        Ok(redirects)
    }

    /// The JS/CSS modules and config vars one rendered article depends on.
    pub async fn get_module_dependencies(&self, title: &str) -> Result<ModuleDependencies> {
        let url = format!(
            "{}?action=parse&format=json&prop=modules|jsconfigvars|headhtml&page={}",
            self.api_url.trim_end_matches('/'),
            urlencoding::encode(title)
        );
        let body = self.run_query(&url).await?;
        let mut deps = ModuleDependencies::default();
        let Some(parsed) = body.get("parse") else {
            return Ok(deps);
        };
        deps.js = string_list(parsed.get("modules"));
        deps.css = string_list(parsed.get("modulestyles"));
        if let Some(vars) = parsed.get("jsconfigvars") {
            let non_empty = vars.as_object().map(|o| !o.is_empty()).unwrap_or(false);
            if non_empty {
                deps.js_config_vars = Some(format!(
                    "window.RLQ=window.RLQ||[];window.RLQ.push(function(){{mw.config.set({vars});}});"
                ));
            }
        }
        Ok(deps)
    }

}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrapeConfig;
    use std::path::PathBuf;

    fn client() -> WikiClient {
        let cfg = ScrapeConfig::new(
            "https://en.wikipedia.org",
            "ops@example.org",
            PathBuf::from("/tmp/out"),
        );
        let downloader = Arc::new(Downloader::new(&cfg, None, None).expect("downloader"));
        WikiClient::new(
            downloader,
            "https://en.wikipedia.org/w/api.php/",
            "_",
            Arc::new(Capabilities::default()),
        )
    }

    #[test]
    fn test_query_url_encodes_params() {
        let c = client();
        let url = c.query_url(&[("titles", "Main Page|Two")]);
        assert!(url.starts_with("https://en.wikipedia.org/w/api.php?action=query&format=json"));
        assert!(url.contains("titles=Main%20Page%7CTwo"));
    }

    #[test]
    fn test_detail_props_follow_capabilities() {
        let c = client();
        assert!(c.detail_props(false).contains("coordinates"));
        assert!(c.detail_props(true).contains("pageimages"));
        c.capabilities.set_coordinates(false);
        assert!(!c.detail_props(false).contains("coordinates"));
    }
}
