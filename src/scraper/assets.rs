//! Module, stylesheet, and favicon collection.
//!
//! JS/CSS modules accumulate per run while articles render; this phase
//! fetches each one from `load.php` and packs it under the assets
//! namespace. Two modules need a source edit to boot offline: `load.php`
//! cannot be re-invoked by the reader, so `startup` waits for a
//! `fireStartUp` event that the patched `mediawiki` module dispatches.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use super::ScrapeContext;
use crate::archive::ArchiveEntry;
use crate::error::Result;
use crate::models::FileTask;

/// The literal in `startup` that normally re-enters the module loader.
const STARTUP_LOADER_LITERAL: &str = "script=document.createElement('script');";

/// Replacement: wait for the reader to fire the boot event instead.
const STARTUP_LISTENER: &str =
    "document.body.addEventListener('fireStartUp',function(){startUp();},false);return;";

/// Appended to `mediawiki` so module setup fires the boot event.
const MEDIAWIKI_DISPATCH: &str =
    ";document.body.dispatchEvent(new CustomEvent('fireStartUp'));";

/// Base modules every page needs, fetched even when no article reported
/// them.
const BASE_JS_MODULES: [&str; 2] = ["startup", "mediawiki"];

fn load_php_url(ctx: &ScrapeContext, module: &str, only: &str) -> String {
    let base = ctx.metadata.api_url.trim_end_matches('/');
    let base = base.trim_end_matches("api.php");
    format!(
        "{base}load.php?modules={}&only={only}&skin=vector&lang={}",
        urlencoding::encode(module),
        ctx.metadata.lang_iso2
    )
}

/// Apply the offline boot edits to a module's source.
fn patch_module_source(module: &str, source: String) -> String {
    match module {
        "startup" => {
            if source.contains(STARTUP_LOADER_LITERAL) {
                source.replace(STARTUP_LOADER_LITERAL, STARTUP_LISTENER)
            } else {
                warn!("startup module missing loader literal; patch skipped");
                source
            }
        }
        "mediawiki" => format!("{source}{MEDIAWIKI_DISPATCH}"),
        _ => source,
    }
}

/// Fetch every accumulated module and write it under the assets
/// namespace.
pub async fn fetch_modules(ctx: &ScrapeContext) -> Result<()> {
    let mut js: BTreeSet<String> = ctx.js_modules.lock().await.clone();
    for base in BASE_JS_MODULES {
        js.insert(base.to_string());
    }
    let css: BTreeSet<String> = ctx.css_modules.lock().await.clone();
    info!("fetching {} JS and {} CSS modules", js.len(), css.len());

    for module in &js {
        let url = load_php_url(ctx, module, "scripts");
        match ctx.downloader.download_content(&url).await {
            Ok((body, _)) => {
                let source = String::from_utf8_lossy(&body).into_owned();
                let patched = patch_module_source(module, source);
                ctx.archive
                    .add_entry(ArchiveEntry::asset(
                        format!("mw/{module}.js"),
                        "application/javascript",
                        patched.into_bytes(),
                    ))
                    .await?;
            }
            Err(e) => warn!("module {module} fetch failed: {e}"),
        }
    }

    // Always present: every page head references it, even when no
    // article reported config vars.
    let vars = ctx.js_config_vars.lock().await.clone().unwrap_or_default();
    ctx.archive
        .add_entry(ArchiveEntry::asset(
            "mw/jsConfigVars.js",
            "application/javascript",
            vars.into_bytes(),
        ))
        .await?;

    for module in &css {
        let url = load_php_url(ctx, module, "styles");
        match ctx.downloader.download_content(&url).await {
            Ok((body, _)) => {
                let source = String::from_utf8_lossy(&body).into_owned();
                let (rewritten, tasks) = dereference_css(&source, &url);
                for task in tasks {
                    ctx.stores.files_to_download.insert_upgrading(task).await;
                }
                ctx.archive
                    .add_entry(ArchiveEntry::asset(
                        format!("mw/{module}.css"),
                        "text/css",
                        rewritten.into_bytes(),
                    ))
                    .await?;
            }
            Err(e) => warn!("module {module} fetch failed: {e}"),
        }
    }
    Ok(())
}

/// Collect the main page's stylesheets into one archive entry, pulling
/// every `url(...)` reference along.
pub async fn fetch_styles(ctx: &ScrapeContext) -> Result<()> {
    let (body, _) = match ctx.downloader.download_content(&ctx.metadata.base_url).await {
        Ok(response) => response,
        Err(e) => {
            warn!("main page fetch for styles failed: {e}");
            return Ok(());
        }
    };
    let html = String::from_utf8_lossy(&body);
    let sheet_urls: Vec<String> = {
        let doc = Html::parse_document(&html);
        let selector = Selector::parse("link[rel=\"stylesheet\"]").expect("static selector");
        doc.select(&selector)
            .filter_map(|link| link.value().attr("href"))
            .filter_map(|href| absolute_url(&ctx.metadata.base_url, href))
            .collect()
    };
    info!("collecting {} stylesheets", sheet_urls.len());

    // Fetch concurrently but append in document order: the cascade
    // depends on it.
    let limit = std::sync::Arc::new(tokio::sync::Semaphore::new(ctx.config.speed));
    let mut handles = Vec::new();
    for sheet_url in sheet_urls {
        let downloader = ctx.downloader.clone();
        let limit = limit.clone();
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = limit.acquire().await else {
                return None;
            };
            match downloader.download_content(&sheet_url).await {
                Ok((css, _)) => {
                    let source = String::from_utf8_lossy(&css);
                    Some(dereference_css(&source, &sheet_url))
                }
                Err(e) => {
                    warn!("stylesheet {sheet_url} fetch failed: {e}");
                    None
                }
            }
        }));
    }

    let mut combined = String::new();
    for handle in handles {
        let Ok(Some((rewritten, tasks))) = handle.await else {
            continue;
        };
        for task in tasks {
            ctx.stores.files_to_download.insert_upgrading(task).await;
        }
        combined.push_str(&rewritten);
        combined.push('\n');
    }

    ctx.archive
        .add_entry(ArchiveEntry::asset(
            "s/style.css",
            "text/css",
            combined.into_bytes(),
        ))
        .await
}

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("static regex")
});

/// Rewrite `url(...)` references to archive-local names and return the
/// download tasks for each referenced file.
pub fn dereference_css(source: &str, sheet_url: &str) -> (String, Vec<FileTask>) {
    let mut tasks = Vec::new();
    let rewritten = CSS_URL_RE
        .replace_all(source, |caps: &regex::Captures<'_>| {
            let reference = caps[1].trim();
            if reference.starts_with("data:") || reference.starts_with('#') {
                return caps[0].to_string();
            }
            let Some(absolute) = absolute_url(sheet_url, reference) else {
                return caps[0].to_string();
            };
            let name = match absolute.split('/').next_back() {
                Some(name) if !name.is_empty() => name.split('?').next().unwrap_or(name),
                _ => return caps[0].to_string(),
            };
            tasks.push(FileTask::asset(format!("s/{name}"), absolute.clone()));
            format!("url({name})")
        })
        .into_owned();
    (rewritten, tasks)
}

fn absolute_url(base: &str, reference: &str) -> Option<String> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Some(reference.to_string());
    }
    if let Some(rest) = reference.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    url::Url::parse(base)
        .ok()?
        .join(reference)
        .ok()
        .map(|u| u.to_string())
}

/// Pack the favicon: a configured file, or the site's `favicon.ico`.
pub async fn fetch_favicon(ctx: &ScrapeContext) -> Result<()> {
    let data = if let Some(path) = &ctx.config.favicon {
        tokio::fs::read(path).await?
    } else {
        let url = format!("{}favicon.ico", ctx.metadata.base_url);
        match ctx.downloader.download_content(&url).await {
            Ok((body, _)) => body,
            Err(e) => {
                debug!("favicon fetch failed: {e}");
                return Ok(());
            }
        }
    };
    ctx.archive
        .add_entry(ArchiveEntry::asset("favicon", "image/x-icon", data))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_patch_replaces_loader() {
        let source = "var x;script=document.createElement('script');x();".to_string();
        let patched = patch_module_source("startup", source);
        assert!(!patched.contains(STARTUP_LOADER_LITERAL));
        assert!(patched.contains("fireStartUp"));
        assert!(patched.contains("return;"));
    }

    #[test]
    fn test_mediawiki_patch_appends_dispatch() {
        let patched = patch_module_source("mediawiki", "mw.loader={};".to_string());
        assert!(patched.starts_with("mw.loader={};"));
        assert!(patched.ends_with(MEDIAWIKI_DISPATCH));
    }

    #[test]
    fn test_other_modules_untouched() {
        let source = "whatever();".to_string();
        assert_eq!(patch_module_source("site", source.clone()), source);
    }

    #[test]
    fn test_dereference_css() {
        let css = "body{background:url('/w/skin/bg.png');}\
                   .x{mask:url(#frag);}\
                   .y{cursor:url(data:image/png;base64,AAA=);}";
        let (rewritten, tasks) =
            dereference_css(css, "https://en.wikipedia.org/w/load.php?only=styles");
        assert!(rewritten.contains("url(bg.png)"), "{rewritten}");
        assert!(rewritten.contains("url(#frag)"));
        assert!(rewritten.contains("url(data:image/png;base64,AAA=)"));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, "s/bg.png");
        assert_eq!(tasks[0].url, "https://en.wikipedia.org/w/skin/bg.png");
        assert_eq!(tasks[0].namespace, '-');
    }

    #[test]
    fn test_dereference_css_strips_query() {
        let css = "a{background:url(\"//u.org/img/i.svg?v=3\");}";
        let (rewritten, tasks) = dereference_css(css, "https://u.org/x.css");
        assert_eq!(tasks[0].path, "s/i.svg");
        assert!(rewritten.contains("url(i.svg)"));
    }
}
