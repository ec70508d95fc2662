//! Run-local HTTP response cache.
//!
//! Responses are cached under the scratch directory keyed by the first 20
//! hex characters of SHA-1(url), with a sibling `.h` file holding the
//! response headers as JSON. A `ref` marker written at run start lets the
//! shutdown sweep delete entries from earlier runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    /// Open the cache directory and touch the `ref` marker.
    pub fn open(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        std::fs::write(root.join("ref"), b"")?;
        Ok(Self { root })
    }

    fn key(url: &str) -> String {
        hex::encode(Sha1::digest(url.as_bytes()))[..20].to_string()
    }

    fn body_path(&self, url: &str) -> PathBuf {
        self.root.join(Self::key(url))
    }

    pub async fn get(&self, url: &str) -> Option<(Vec<u8>, HashMap<String, String>)> {
        let body_path = self.body_path(url);
        let body = tokio::fs::read(&body_path).await.ok()?;
        let headers = tokio::fs::read(body_path.with_extension("h"))
            .await
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or_default();
        debug!("response cache hit for {url}");
        Some((body, headers))
    }

    pub async fn put(&self, url: &str, body: &[u8], headers: &HashMap<String, String>) {
        let body_path = self.body_path(url);
        if let Err(e) = tokio::fs::write(&body_path, body).await {
            warn!("response cache write failed for {url}: {e}");
            return;
        }
        if let Ok(raw) = serde_json::to_vec(headers) {
            let _ = tokio::fs::write(body_path.with_extension("h"), raw).await;
        }
    }

    /// Delete files older than the `ref` marker.
    pub fn clean(&self) -> std::io::Result<usize> {
        let ref_mtime = std::fs::metadata(self.root.join("ref"))?.modified()?;
        let mut removed = 0usize;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name() == "ref" {
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if mtime < ref_mtime {
                if std::fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        debug!("response cache sweep removed {removed} stale files");
        Ok(removed)
    }
}
