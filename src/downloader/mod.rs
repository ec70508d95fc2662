//! Adaptive-concurrency HTTP layer.
//!
//! Every outbound request of the run goes through this module: JSON API
//! queries, article fetches, and media byte streams. It enforces a global
//! in-flight cap that shrinks on 429 responses, wraps each logical request
//! in exponential backoff, revalidates images against the blob cache, and
//! feeds bitmaps through the optimisation pipeline.

mod backoff;
mod cache;
mod optimiser;

pub use backoff::{with_backoff, FAIL_AFTER};
pub use cache::ResponseCache;
pub use optimiser::ImageOptimiser;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::blob_cache::BlobCache;
use crate::config::ScrapeConfig;
use crate::error::{DownloadError, Result, ScrapeError};
use crate::models::{Capabilities, WikiMetadata};
use crate::utils::strip_http;

/// Poll interval while waiting for a request slot.
const SLOT_POLL: Duration = Duration::from_millis(200);

/// A raw upstream response after status validation.
#[derive(Debug)]
struct RawResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// Decrements the in-flight counter when the request finishes.
struct SlotGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bidirectional table behind `serialize_url` / `deserialize_url`.
///
/// Many media URLs share a long host-and-path prefix; storing the prefix
/// once and the tail per entry keeps the download stores small.
#[derive(Debug, Default)]
struct UrlPartCache {
    by_prefix: HashMap<String, String>,
    by_key: HashMap<String, String>,
    next: usize,
}

pub struct Downloader {
    client: Client,
    image_re: Regex,
    active_requests: Arc<AtomicUsize>,
    max_active_requests: Arc<AtomicUsize>,
    url_parts: std::sync::Mutex<UrlPartCache>,
    blob_cache: Option<Arc<dyn BlobCache>>,
    scratch: Option<ResponseCache>,
    optimiser: ImageOptimiser,
    /// Endpoint prefix for regular article fetches; the article id is
    /// appended directly.
    article_base_url: RwLock<String>,
    /// Endpoint prefix for the main page (desktop rendering path).
    main_page_base_url: RwLock<String>,
    /// Local parser services spawned as a fallback; killed on drop.
    local_services: Mutex<Vec<Child>>,
}

impl Downloader {
    pub fn new(
        cfg: &ScrapeConfig,
        blob_cache: Option<Arc<dyn BlobCache>>,
        scratch: Option<ResponseCache>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(cfg.user_agent())
            .timeout(Duration::from_secs(cfg.req_timeout_secs))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(DownloadError::Network)?;
        let image_re = Regex::new(&cfg.image_extensions)
            .map_err(|e| ScrapeError::Config(format!("bad image extension regex: {e}")))?;

        Ok(Self {
            client,
            image_re,
            active_requests: Arc::new(AtomicUsize::new(0)),
            max_active_requests: Arc::new(AtomicUsize::new(cfg.speed * 10)),
            url_parts: std::sync::Mutex::new(UrlPartCache::default()),
            blob_cache,
            scratch,
            optimiser: ImageOptimiser::new(cfg.speed),
            article_base_url: RwLock::new(String::new()),
            main_page_base_url: RwLock::new(String::new()),
            local_services: Mutex::new(Vec::new()),
        })
    }

    /// Current in-flight cap; shrinks on 429 and never recovers within a
    /// run.
    pub fn max_active_requests(&self) -> usize {
        self.max_active_requests.load(Ordering::SeqCst)
    }

    /// Block until a request slot frees up, then claim it.
    async fn claim_slot(&self) -> SlotGuard {
        loop {
            let max = self.max_active_requests.load(Ordering::SeqCst);
            let active = self.active_requests.load(Ordering::SeqCst);
            if active < max
                && self
                    .active_requests
                    .compare_exchange(active, active + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return SlotGuard {
                    active: self.active_requests.clone(),
                };
            }
            tokio::time::sleep(SLOT_POLL).await;
        }
    }

    /// Shrink the in-flight cap after a 429, floor of one.
    fn throttle(&self) {
        let mut current = self.max_active_requests.load(Ordering::SeqCst);
        loop {
            let reduced = ((current * 9) + 9) / 10;
            let next = reduced.max(1);
            match self.max_active_requests.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    warn!("throttled: max in-flight requests now {next}");
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// One request attempt. 429 shrinks the cap and reports retriable;
    /// 404 is terminal; 304 is only valid for conditional requests.
    async fn attempt(
        &self,
        url: &str,
        accept_json: bool,
        if_none_match: Option<&str>,
        allow_not_modified: bool,
    ) -> std::result::Result<RawResponse, DownloadError> {
        let _slot = self.claim_slot().await;

        let mut request = self.client.get(url);
        if accept_json {
            request = request.header("Accept", "application/json");
        }
        if let Some(etag) = if_none_match {
            request = request.header("If-None-Match", etag);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::Timeout {
                    url: url.to_string(),
                }
            } else {
                DownloadError::Network(e)
            }
        })?;

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_lowercase(), v.to_string());
            }
        }

        match status {
            429 => {
                self.throttle();
                Err(DownloadError::Status {
                    status,
                    url: url.to_string(),
                })
            }
            404 => Err(DownloadError::NotFound {
                url: url.to_string(),
            }),
            304 if allow_not_modified => Ok(RawResponse {
                status,
                headers,
                body: Vec::new(),
            }),
            s if (200..300).contains(&s) => {
                let body = response
                    .bytes()
                    .await
                    .map_err(DownloadError::Network)?
                    .to_vec();
                Ok(RawResponse {
                    status,
                    headers,
                    body,
                })
            }
            s => Err(DownloadError::Status {
                status: s,
                url: url.to_string(),
            }),
        }
    }

    /// Fetch and parse a JSON endpoint.
    pub async fn get_json(&self, url: &str) -> std::result::Result<Value, DownloadError> {
        let resolved = self.deserialize_url(url);
        let raw = with_backoff(&resolved, || self.attempt(&resolved, true, None, false)).await?;
        serde_json::from_slice(&raw.body).map_err(|e| DownloadError::Malformed {
            url: resolved.clone(),
            reason: e.to_string(),
        })
    }

    /// Download raw bytes, revalidating images against the blob cache and
    /// optimising bitmaps before returning.
    pub async fn download_content(
        &self,
        url: &str,
    ) -> std::result::Result<(Vec<u8>, HashMap<String, String>), DownloadError> {
        let resolved = self.deserialize_url(url);

        if let Some(scratch) = &self.scratch {
            if let Some(hit) = scratch.get(&resolved).await {
                return Ok(hit);
            }
        }

        let is_image = self.image_re.is_match(&resolved);
        let mut cached = None;
        if is_image {
            if let Some(blob_cache) = &self.blob_cache {
                match blob_cache.get(&strip_http(&resolved)).await {
                    Ok(entry) => cached = entry,
                    Err(e) => debug!("blob cache lookup failed for {resolved}: {e}"),
                }
            }
        }
        let etag_hint = cached.as_ref().map(|e| e.etag.clone());

        let raw = with_backoff(&resolved, || {
            self.attempt(&resolved, false, etag_hint.as_deref(), etag_hint.is_some())
        })
        .await?;

        if raw.status == 304 {
            // Revalidated: serve the cached bytes with their stored
            // headers; no optimisation, no cache write-back.
            let entry = cached.ok_or_else(|| DownloadError::Malformed {
                url: resolved.clone(),
                reason: "304 without a cached entry".to_string(),
            })?;
            debug!("blob cache revalidated {resolved}");
            return Ok((entry.body, entry.headers));
        }

        let mut body = raw.body;
        let headers = raw.headers;

        let content_type = headers.get("content-type").cloned().unwrap_or_default();
        if is_image && ImageOptimiser::handles(&content_type) {
            body = self.optimiser.optimise(&content_type, body).await;
        }

        if is_image {
            if let (Some(blob_cache), Some(etag)) = (&self.blob_cache, headers.get("etag")) {
                if !etag.is_empty() {
                    let blob_cache = blob_cache.clone();
                    let key = strip_http(&resolved);
                    let etag = etag.clone();
                    let upload = body.clone();
                    let upload_headers = headers.clone();
                    tokio::spawn(async move {
                        if let Err(e) = blob_cache.put(&key, &etag, upload, upload_headers).await {
                            debug!("blob cache upload failed for {key}: {e}");
                        }
                    });
                }
            }
        }

        if let Some(scratch) = &self.scratch {
            scratch.put(&resolved, &body, &headers).await;
        }
        Ok((body, headers))
    }

    /// Compress a URL by replacing its directory prefix with a short key.
    pub fn serialize_url(&self, url: &str) -> String {
        if url.starts_with('_') {
            return url.to_string();
        }
        let Some(slash) = url.rfind('/') else {
            return url.to_string();
        };
        let (prefix, tail) = url.split_at(slash + 1);
        let mut parts = self.url_parts.lock().expect("url part cache lock");
        let key = match parts.by_prefix.get(prefix) {
            Some(key) => key.clone(),
            None => {
                let key = format!("_{}_", parts.next);
                parts.next += 1;
                parts.by_prefix.insert(prefix.to_string(), key.clone());
                parts.by_key.insert(key.clone(), prefix.to_string());
                key
            }
        };
        format!("{key}{tail}")
    }

    /// Inverse of [`serialize_url`]; passes non-serialized URLs through.
    pub fn deserialize_url(&self, url: &str) -> String {
        if !url.starts_with('_') {
            return url.to_string();
        }
        let Some(end) = url[1..].find('_').map(|i| i + 2) else {
            return url.to_string();
        };
        let (key, tail) = url.split_at(end);
        let parts = self.url_parts.lock().expect("url part cache lock");
        match parts.by_key.get(key) {
            Some(prefix) => format!("{prefix}{tail}"),
            None => url.to_string(),
        }
    }

    /// Probe the REST and visual-editor endpoints and pick the article
    /// fetch URLs; spawn the local parser services when both fail and the
    /// fallback is enabled.
    pub async fn probe_capabilities(
        &self,
        cfg: &ScrapeConfig,
        meta: &WikiMetadata,
        caps: &Capabilities,
    ) -> Result<()> {
        let encoded_main = urlencoding::encode(&meta.main_page).into_owned();

        let rest_probe = format!("{}page/mobile-sections/{}", meta.rest_url, encoded_main);
        if self.get_json(&rest_probe).await.is_ok() {
            caps.set_rest_api(true);
            info!("REST mobile-sections endpoint available");
        }

        let ve_prefix = format!(
            "{}?action=visualeditor&origin=*&paction=parse&format=json&page=",
            meta.ve_url.trim_end_matches('/')
        );
        let ve_probe = format!("{ve_prefix}{encoded_main}");
        match self.get_json(&ve_probe).await {
            Ok(body) if body.get("visualeditor").is_some() => {
                caps.set_ve_api(true);
                info!("visual editor endpoint available");
            }
            _ => {}
        }

        if caps.rest_api() {
            *self.article_base_url.write().await =
                format!("{}page/mobile-sections/", meta.rest_url);
        }

        let desktop_prefix = if caps.ve_api() {
            ve_prefix
        } else {
            format!(
                "{}?action=parse&format=json&prop=text|headhtml&page=",
                meta.api_url.trim_end_matches('/')
            )
        };
        *self.main_page_base_url.write().await = desktop_prefix.clone();

        if !caps.rest_api() && !caps.ve_api() {
            if cfg.no_local_parser {
                return Err(ScrapeError::NoRenderer);
            }
            self.spawn_local_services(cfg, meta).await?;
            // The local mobile-content service answers in the REST shape.
            caps.set_rest_api(true);
        } else if !caps.rest_api() {
            // No mobile sections anywhere: every article takes the
            // desktop path.
            *self.article_base_url.write().await = desktop_prefix;
        }
        Ok(())
    }

    /// Launch local Parsoid and mobile-content services and point the
    /// article URLs at them.
    async fn spawn_local_services(&self, cfg: &ScrapeConfig, meta: &WikiMetadata) -> Result<()> {
        let host = url::Url::parse(&meta.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| ScrapeError::Config(format!("bad wiki URL: {}", meta.base_url)))?;

        let mut services = self.local_services.lock().await;
        for cmd in [&cfg.local_parsoid_cmd, &cfg.local_mcs_cmd].into_iter().flatten() {
            info!("starting local parser service: {cmd}");
            let child = Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?;
            services.push(child);
        }
        if services.is_empty() {
            return Err(ScrapeError::NoRenderer);
        }
        // Give the services a moment to bind before the first fetch.
        tokio::time::sleep(Duration::from_secs(3)).await;

        *self.article_base_url.write().await =
            format!("http://localhost:6927/{host}/v1/page/mobile-sections/");
        *self.main_page_base_url.write().await =
            format!("http://localhost:8000/{host}/v3/page/pagebundle/");
        info!("article fetches re-pointed at local parser services");
        Ok(())
    }

    /// Fetch the raw upstream JSON for one article.
    pub async fn get_article(
        &self,
        article_id: &str,
        is_main_page: bool,
    ) -> std::result::Result<Value, DownloadError> {
        let base = if is_main_page {
            self.main_page_base_url.read().await.clone()
        } else {
            self.article_base_url.read().await.clone()
        };
        let url = format!("{base}{}", crate::utils::encode_article_id(article_id));
        self.get_json(&url).await
    }

    /// Stop any local parser services.
    pub async fn shutdown(&self) {
        let mut services = self.local_services.lock().await;
        for child in services.iter_mut() {
            let _ = child.kill().await;
        }
        services.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn downloader() -> Downloader {
        let cfg = ScrapeConfig::new(
            "https://en.wikipedia.org",
            "ops@example.org",
            PathBuf::from("/tmp/out"),
        );
        Downloader::new(&cfg, None, None).expect("downloader")
    }

    #[test]
    fn test_serialize_url_round_trip() {
        let d = downloader();
        let url = "https://upload.wikimedia.org/wikipedia/commons/a/ab/Foo.jpg";
        let short = d.serialize_url(url);
        assert!(short.starts_with("_0_"));
        assert_eq!(d.deserialize_url(&short), url);
        // serialize(deserialize(x)) == x for serialized inputs
        assert_eq!(d.serialize_url(&d.deserialize_url(&short)), short);
    }

    #[test]
    fn test_serialize_url_shares_prefixes() {
        let d = downloader();
        let a = d.serialize_url("https://u.org/img/a.png");
        let b = d.serialize_url("https://u.org/img/b.png");
        assert_eq!(a, "_0_a.png");
        assert_eq!(b, "_0_b.png");
    }

    #[test]
    fn test_deserialize_passes_plain_urls() {
        let d = downloader();
        assert_eq!(
            d.deserialize_url("https://u.org/a.png"),
            "https://u.org/a.png"
        );
    }

    #[test]
    fn test_throttle_shrinks_and_floors() {
        let d = downloader();
        let initial = d.max_active_requests();
        assert_eq!(initial, 30);
        d.throttle();
        assert_eq!(d.max_active_requests(), 27);
        // Repeated throttling never reaches zero.
        for _ in 0..200 {
            d.throttle();
        }
        assert_eq!(d.max_active_requests(), 1);
    }
}
