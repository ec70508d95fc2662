//! The scrape orchestrator: phases 1 through 9.
//!
//! Each phase drains before the next begins. Failures inside a phase are
//! counted and logged per article or file; only configuration and
//! archive errors abort the run.

mod assets;

use std::collections::BTreeSet;
use std::sync::Arc;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::archive::{namespaces, ArchiveEntry, ArchiveWriter, FsArchiveWriter};
use crate::blob_cache::{BlobCache, FsBlobCache};
use crate::config::ScrapeConfig;
use crate::downloader::{Downloader, ResponseCache};
use crate::error::{Result, ScrapeError};
use crate::models::{ArticleDetail, Capabilities, Redirect, ScrapeStatus, WikiMetadata};
use crate::renderer;
use crate::rewriter::{self, LinkResolution, RewriteContext};
use crate::store::RunStores;
use crate::wiki::WikiClient;

/// Titles per details query batch.
const DETAILS_BATCH: usize = 50;

/// Shared state threaded through every phase.
pub struct ScrapeContext {
    pub config: ScrapeConfig,
    pub metadata: WikiMetadata,
    pub capabilities: Arc<Capabilities>,
    pub stores: RunStores,
    pub status: Arc<ScrapeStatus>,
    pub downloader: Arc<Downloader>,
    pub wiki: Arc<WikiClient>,
    pub archive: Arc<dyn ArchiveWriter>,
    /// May be rewritten once during redirect resolution.
    pub main_page: RwLock<String>,
    pub js_modules: Mutex<BTreeSet<String>>,
    pub css_modules: Mutex<BTreeSet<String>>,
    pub js_config_vars: Mutex<Option<String>>,
    scratch: Option<ResponseCache>,
}

/// Run a complete scrape.
pub async fn run(config: ScrapeConfig) -> Result<()> {
    let ctx = Arc::new(bootstrap(config).await?);

    enumerate_articles(&ctx).await?;
    resolve_main_page_redirect(&ctx).await;
    scrape_articles(&ctx).await;
    assets::fetch_modules(&ctx).await?;
    assets::fetch_styles(&ctx).await?;
    assets::fetch_favicon(&ctx).await?;
    download_files(&ctx).await?;
    finish(&ctx).await?;

    println!(
        "{} All dumping(s) finished with success",
        style("✓").green()
    );
    Ok(())
}

/// Phase 1: configuration, probes, directories.
async fn bootstrap(config: ScrapeConfig) -> Result<ScrapeContext> {
    config.validate()?;
    std::fs::create_dir_all(&config.out_dir)?;

    let scratch = match &config.cache_dir {
        Some(dir) => Some(ResponseCache::open(dir.clone())?),
        None => Some(ResponseCache::open(config.out_dir.join(".cache"))?),
    };
    let blob_cache: Option<Arc<dyn BlobCache>> = config
        .blob_cache_dir
        .as_ref()
        .map(|dir| Arc::new(FsBlobCache::new(dir.clone())) as Arc<dyn BlobCache>);

    let downloader = Arc::new(Downloader::new(&config, blob_cache, scratch.clone())?);
    let capabilities = Arc::new(Capabilities::default());

    // A provisional client reaches the API before site metadata exists.
    let origin = url::Url::parse(&config.wiki_url)
        .map_err(|e| ScrapeError::Config(format!("bad wiki URL: {e}")))?;
    let provisional_api = format!(
        "{}://{}/w/api.php/",
        origin.scheme(),
        origin
            .host_str()
            .ok_or_else(|| ScrapeError::Config("wiki URL has no host".into()))?
    );
    let provisional = WikiClient::new(
        downloader.clone(),
        provisional_api,
        config.space_delimiter.clone(),
        capabilities.clone(),
    );
    let mut metadata = provisional.get_metadata(&config.wiki_url).await?;
    if let Some(main_page) = &config.main_page {
        metadata.main_page = main_page.replace(' ', &config.space_delimiter);
    }
    info!(
        "site {} ({}, {} articles)",
        metadata.site_name, metadata.lang_iso2, metadata.article_count
    );

    let wiki = Arc::new(WikiClient::new(
        downloader.clone(),
        metadata.api_url.clone(),
        config.space_delimiter.clone(),
        capabilities.clone(),
    ));

    downloader
        .probe_capabilities(&config, &metadata, &capabilities)
        .await?;
    if capabilities.all_unavailable() {
        return Err(ScrapeError::NoRenderer);
    }

    let archive: Arc<dyn ArchiveWriter> =
        Arc::new(FsArchiveWriter::new(config.out_dir.join("archive")));

    let main_page = metadata.main_page.clone();
    Ok(ScrapeContext {
        config,
        metadata,
        capabilities,
        stores: RunStores::new(),
        status: Arc::new(ScrapeStatus::default()),
        downloader,
        wiki,
        archive,
        main_page: RwLock::new(main_page),
        js_modules: Mutex::new(BTreeSet::new()),
        css_modules: Mutex::new(BTreeSet::new()),
        js_config_vars: Mutex::new(None),
        scratch,
    })
}

/// Phase 2: fill the article store, from a list file or by walking the
/// content namespaces.
async fn enumerate_articles(ctx: &Arc<ScrapeContext>) -> Result<()> {
    match ctx.config.article_list.clone() {
        Some(list_path) => {
            let raw = tokio::fs::read_to_string(&list_path).await?;
            let titles: Vec<String> = raw
                .lines()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .map(|l| l.replace(' ', &ctx.config.space_delimiter))
                .collect();
            info!("enumerating {} listed articles", titles.len());
            for batch in titles.chunks(DETAILS_BATCH) {
                let details = ctx
                    .wiki
                    .get_article_details_by_ids(batch, true)
                    .await?;
                store_batch(ctx, details).await;
            }
        }
        None => {
            // No list: walk every content namespace, resuming through the
            // generator cursor, and include the landing page explicitly.
            let main_page = ctx.main_page.read().await.clone();
            let main_details = ctx
                .wiki
                .get_article_details_by_ids(&[main_page], true)
                .await?;
            store_batch(ctx, main_details).await;

            for ns in ctx.metadata.content_namespaces() {
                info!("enumerating namespace {} ({})", ns.id, ns.canonical);
                let mut gap_continue = String::new();
                loop {
                    let (details, next) = ctx
                        .wiki
                        .get_article_details_by_namespace(ns.id, &gap_continue)
                        .await?;
                    store_batch(ctx, details).await;
                    match next {
                        Some(token) => gap_continue = token,
                        None => break,
                    }
                }
            }
        }
    }
    info!(
        "enumeration done: {} articles, {} redirects",
        ctx.stores.article_detail.len().await,
        ctx.stores.redirects.len().await
    );
    Ok(())
}

/// Insert one batch of details and kick off redirect discovery for it.
async fn store_batch(
    ctx: &Arc<ScrapeContext>,
    details: std::collections::HashMap<String, ArticleDetail>,
) {
    let titles: Vec<String> = details.keys().cloned().collect();
    for (title, detail) in details {
        ctx.stores.article_detail.insert(title, detail).await;
    }

    // Redirect discovery runs concurrently, bounded at speed x 3.
    let limit = Arc::new(Semaphore::new(ctx.config.speed * 3));
    let mut handles = Vec::new();
    for title in titles {
        let ctx = ctx.clone();
        let limit = limit.clone();
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = limit.acquire().await else {
                return;
            };
            match ctx.wiki.get_backlink_redirects(&title).await {
                Ok(sources) => {
                    for source in sources {
                        if ctx.stores.article_detail.contains(&source.title).await {
                            continue;
                        }
                        ctx.stores
                            .redirects
                            .insert(
                                source.title.clone(),
                                Redirect {
                                    from: source.title,
                                    to: title.clone(),
                                },
                            )
                            .await;
                    }
                }
                Err(e) => debug!("redirect query failed for {title}: {e}"),
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

/// Phase 3: follow a single redirect hop for the landing page.
///
/// Backlink discovery skips titles already present in the article store,
/// and the main page is always inserted up front, so its own forward
/// redirect never lands in the redirect store by itself. Ask the wiki
/// directly instead, and fall back to whatever enumeration recorded.
async fn resolve_main_page_redirect(ctx: &Arc<ScrapeContext>) {
    let current = ctx.main_page.read().await.clone();

    let target = match ctx.wiki.resolve_forward_redirect(&current).await {
        Ok(target) => target,
        Err(e) => {
            warn!("main page redirect query failed: {e}");
            None
        }
    }
    .or(ctx.stores.redirects.get(&current).await.map(|r| r.to));

    let Some(target) = target else { return };
    if target == current {
        return;
    }
    info!("main page {current} redirects to {target}");

    // The stub entry must not be archived; links to the old id resolve
    // through the redirect record instead.
    ctx.stores.article_detail.remove(&current).await;
    ctx.stores
        .redirects
        .insert(
            current.clone(),
            Redirect {
                from: current,
                to: target.clone(),
            },
        )
        .await;

    if !ctx.stores.article_detail.contains(&target).await {
        match ctx
            .wiki
            .get_article_details_by_ids(&[target.clone()], true)
            .await
        {
            Ok(details) => {
                for (title, detail) in details {
                    ctx.stores.article_detail.insert(title, detail).await;
                }
            }
            Err(e) => warn!("details fetch for redirect target {target} failed: {e}"),
        }
    }

    *ctx.main_page.write().await = target;
}

/// Phase 4: fetch, render, rewrite, and archive every article.
async fn scrape_articles(ctx: &Arc<ScrapeContext>) {
    let total = ctx.stores.article_detail.len().await as u64;
    let bar = progress_bar(total, "articles");

    let worker_ctx = ctx.clone();
    let worker_bar = bar.clone();
    ctx.stores
        .article_detail
        .iterate(ctx.config.speed, move |id, detail| {
            let ctx = worker_ctx.clone();
            let bar = worker_bar.clone();
            async move {
                match process_article(&ctx, &id, detail).await {
                    Ok(()) => ctx.status.articles.add_success(),
                    Err(e) => {
                        ctx.status.articles.add_fail();
                        warn!("article {id} failed: {e}");
                    }
                }
                bar.inc(1);
                log_progress("articles", ctx.status.articles.total(), total);
            }
        })
        .await;
    bar.finish_and_clear();
    info!(
        "article phase done: {} ok, {} failed",
        ctx.status.articles.success(),
        ctx.status.articles.fail()
    );
}

async fn process_article(
    ctx: &Arc<ScrapeContext>,
    article_id: &str,
    mut detail: ArticleDetail,
) -> Result<()> {
    // Pagination shards carry their own listing slices already.
    let is_shard = article_id != detail.title;
    let is_main = *ctx.main_page.read().await == article_id;

    // Categories pull their member listings before rendering.
    if detail.namespace == 14 && detail.sub_categories.is_empty() && !is_shard {
        let members = ctx.wiki.get_category_members(article_id).await?;
        detail.sub_categories = members.sub_categories;
        detail.pages = members.pages;
        ctx.stores
            .article_detail
            .insert(article_id.to_string(), detail.clone())
            .await;
    }

    let response = ctx
        .downloader
        .get_article(article_id, is_main)
        .await
        .map_err(ScrapeError::Download)?;

    let rendered = renderer::render(
        article_id,
        &detail,
        &response,
        is_main,
        ctx.capabilities.rest_api(),
    )?;

    // Module dependencies accumulate across the run; the config vars
    // come from the first article that reports a non-empty value.
    let deps = match ctx.wiki.get_module_dependencies(article_id).await {
        Ok(deps) => deps,
        Err(e) => {
            debug!("module query failed for {article_id}: {e}");
            Default::default()
        }
    };
    {
        let mut js = ctx.js_modules.lock().await;
        js.extend(deps.js.iter().cloned());
        let mut css = ctx.css_modules.lock().await;
        css.extend(deps.css.iter().cloned());
        if let Some(vars) = &deps.js_config_vars {
            let mut slot = ctx.js_config_vars.lock().await;
            if slot.is_none() {
                *slot = Some(vars.clone());
            }
        }
    }

    let js_names = head_js_names(&deps.js);
    let css_names = head_css_names(&deps.css);

    for article in rendered {
        // Pagination shards become store records of their own; shard 0
        // is written back so its neighbour pointers are on record.
        if article.id != article_id || article.detail.next_article_id.is_some() {
            ctx.stores
                .article_detail
                .insert(article.id.clone(), article.detail.clone())
                .await;
        }

        let links = resolve_links(ctx, &article.html).await;
        let metadata = &ctx.metadata;
        let namespace_for = |title: &str| -> char {
            match metadata.namespace_of(title) {
                Some(ns) if ns.id == 14 => namespaces::CATEGORIES,
                _ => namespaces::ARTICLES,
            }
        };

        let rewrite_ctx = RewriteContext {
            article_id: &article.id,
            display_title: &article.display_title,
            detail: &article.detail,
            metadata: &ctx.metadata,
            config: &ctx.config,
            links: &links,
            namespace_for: &namespace_for,
            js_names: &js_names,
            css_names: &css_names,
        };
        let output = rewriter::rewrite_article(&article.html, &rewrite_ctx);

        // Media URLs share long host prefixes; store them compressed.
        for mut task in output.media {
            task.url = ctx.downloader.serialize_url(&task.url);
            ctx.stores.files_to_download.insert_upgrading(task).await;
        }

        let namespace = if article.detail.namespace == 14 {
            namespaces::CATEGORIES
        } else {
            namespaces::ARTICLES
        };
        ctx.archive
            .add_entry(ArchiveEntry {
                namespace,
                url: article.id.clone(),
                mime_type: "text/html".to_string(),
                indexable: namespace == namespaces::ARTICLES,
                data: output.html.into_bytes(),
            })
            .await?;
    }
    Ok(())
}

/// Resolve the link targets of one rendered fragment against the stores.
async fn resolve_links(ctx: &Arc<ScrapeContext>, html: &str) -> LinkResolution {
    let mut resolution = LinkResolution::default();
    for title in rewriter::link_targets(html) {
        if ctx.stores.article_detail.contains(&title).await {
            resolution.mirrored.insert(title);
        } else if let Some(redirect) = ctx.stores.redirects.get(&title).await {
            if ctx.stores.article_detail.contains(&redirect.to).await {
                resolution.redirects.insert(title, redirect.to);
            }
        }
    }
    resolution
}

/// Head script names for one article, in boot order.
fn head_js_names(modules: &[String]) -> Vec<String> {
    let mut names = vec![
        "mw/startup.js".to_string(),
        "mw/jsConfigVars.js".to_string(),
        "mw/mediawiki.js".to_string(),
    ];
    names.extend(modules.iter().map(|m| format!("mw/{m}.js")));
    names
}

fn head_css_names(modules: &[String]) -> Vec<String> {
    let mut names = vec!["s/style.css".to_string()];
    names.extend(modules.iter().map(|m| format!("mw/{m}.css")));
    names
}

/// Phases 7 and 8: the two file passes.
async fn download_files(ctx: &Arc<ScrapeContext>) -> Result<()> {
    let workers = ctx.config.speed * 5;

    // Pass 1: failures spill into the retry store.
    let total = ctx.stores.files_to_download.len().await as u64;
    info!("file pass 1: {total} files");
    let bar = progress_bar(total, "files");
    {
        let worker_ctx = ctx.clone();
        let worker_bar = bar.clone();
        ctx.stores
            .files_to_download
            .iterate(workers, move |_path, task| {
                let ctx = worker_ctx.clone();
                let bar = worker_bar.clone();
                async move {
                    match fetch_file(&ctx, &task).await {
                        Ok(()) => ctx.status.files.add_success(),
                        Err(e) => {
                            debug!("file {} failed, queued for retry: {e}", task.url);
                            ctx.stores
                                .files_to_retry
                                .insert(task.path.clone(), task)
                                .await;
                        }
                    }
                    bar.inc(1);
                    log_progress("files", ctx.status.files.total(), total);
                }
            })
            .await;
    }
    bar.finish_and_clear();

    // Pass 2: failures are terminal.
    let retries = ctx.stores.files_to_retry.len().await;
    if retries > 0 {
        info!("file pass 2: retrying {retries} files");
        let worker_ctx = ctx.clone();
        ctx.stores
            .files_to_retry
            .iterate(workers, move |_path, task| {
                let ctx = worker_ctx.clone();
                async move {
                    match fetch_file(&ctx, &task).await {
                        Ok(()) => ctx.status.files.add_success(),
                        Err(e) => {
                            ctx.status.files.add_fail();
                            warn!("file {} failed permanently: {e}", task.url);
                        }
                    }
                }
            })
            .await;
    }
    info!(
        "file phase done: {} ok, {} failed",
        ctx.status.files.success(),
        ctx.status.files.fail()
    );
    Ok(())
}

async fn fetch_file(ctx: &Arc<ScrapeContext>, task: &crate::models::FileTask) -> Result<()> {
    let (data, headers) = ctx
        .downloader
        .download_content(&task.url)
        .await
        .map_err(ScrapeError::Download)?;
    let mime_type = headers
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    ctx.archive
        .add_entry(ArchiveEntry {
            namespace: task.namespace,
            url: task.path.clone(),
            mime_type,
            indexable: false,
            data,
        })
        .await
}

/// Phase 9: seal the archive and clear run state.
async fn finish(ctx: &Arc<ScrapeContext>) -> Result<()> {
    write_archive_metadata(ctx).await?;
    if ctx.config.formats.nozim {
        info!("nozim format: skipping archive finalization");
    } else {
        ctx.archive.finalize().await?;
    }
    ctx.stores.clear_all().await;
    if !ctx.config.skip_cache_cleaning {
        if let Some(scratch) = &ctx.scratch {
            if let Err(e) = scratch.clean() {
                warn!("scratch cache sweep failed: {e}");
            }
        }
    }
    ctx.downloader.shutdown().await;
    Ok(())
}

/// Descriptive entries readers surface about the archive itself.
async fn write_archive_metadata(ctx: &Arc<ScrapeContext>) -> Result<()> {
    let creator = ctx
        .config
        .creator
        .clone()
        .unwrap_or_else(|| ctx.metadata.site_name.clone());
    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let main_page = ctx.main_page.read().await.clone();
    let entries = [
        ("Title", ctx.metadata.site_name.clone()),
        ("Language", ctx.metadata.lang_iso3.clone()),
        ("Creator", creator),
        ("Date", date),
        ("MainPage", main_page),
        ("Source", ctx.metadata.base_url.clone()),
    ];
    for (name, value) in entries {
        ctx.archive
            .add_entry(ArchiveEntry {
                namespace: namespaces::METADATA,
                url: name.to_string(),
                mime_type: "text/plain".to_string(),
                indexable: false,
                data: value.into_bytes(),
            })
            .await?;
    }
    Ok(())
}

fn progress_bar(total: u64, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} ({percent}%)")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(label.to_string());
    bar
}

/// Periodic `[k/N] [p%]` lines for log-only environments.
fn log_progress(label: &str, done: u64, total: u64) {
    if total == 0 {
        return;
    }
    let step = (total / 20).max(1);
    if done % step == 0 || done == total {
        let percent = done * 100 / total;
        info!("{label}: [{done}/{total}] [{percent}%]");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_names_order() {
        let js = head_js_names(&["site".to_string()]);
        assert_eq!(
            js,
            vec![
                "mw/startup.js".to_string(),
                "mw/jsConfigVars.js".to_string(),
                "mw/mediawiki.js".to_string(),
                "mw/site.js".to_string(),
            ]
        );
        let css = head_css_names(&["skins.vector.styles".to_string()]);
        assert_eq!(css[0], "s/style.css");
        assert_eq!(css[1], "mw/skins.vector.styles.css");
    }
}
