//! Content-addressed blob cache with entity-tag revalidation.
//!
//! Image downloads consult this store before hitting the upstream host:
//! a stored etag becomes an `If-None-Match` header, and a 304 answer is
//! served from the cached body without re-running image optimisation.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::debug;

/// A cached object: body plus the metadata needed for revalidation.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub body: Vec<u8>,
    pub etag: String,
    pub headers: HashMap<String, String>,
}

/// Conditional GET/PUT contract against the cache backend.
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Fetch the object stored under `key`, if any.
    async fn get(&self, key: &str) -> anyhow::Result<Option<BlobEntry>>;

    /// Store `body` under `key` with its upstream etag.
    async fn put(
        &self,
        key: &str,
        etag: &str,
        body: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobMeta {
    etag: String,
    headers: HashMap<String, String>,
}

/// Filesystem-backed cache; a remote store can be slotted in behind the
/// same trait.
pub struct FsBlobCache {
    root: PathBuf,
}

impl FsBlobCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Objects are laid out by SHA-1 of the key, two-level fan-out, with a
    /// sibling `.meta` JSON carrying the etag and response headers.
    fn object_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha1::digest(key.as_bytes()));
        self.root.join(&digest[..2]).join(&digest[2..])
    }
}

#[async_trait]
impl BlobCache for FsBlobCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<BlobEntry>> {
        let path = self.object_path(key);
        let meta_path = path.with_extension("meta");
        if !path.exists() || !meta_path.exists() {
            return Ok(None);
        }
        let body = tokio::fs::read(&path).await?;
        let meta: BlobMeta = serde_json::from_slice(&tokio::fs::read(&meta_path).await?)?;
        debug!("blob cache hit for {key} (etag {})", meta.etag);
        Ok(Some(BlobEntry {
            body,
            etag: meta.etag,
            headers: meta.headers,
        }))
    }

    async fn put(
        &self,
        key: &str,
        etag: &str,
        body: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        let meta = BlobMeta {
            etag: etag.to_string(),
            headers,
        };
        tokio::fs::write(path.with_extension("meta"), serde_json::to_vec(&meta)?).await?;
        debug!("blob cache stored {key} ({} bytes)", body.len());
        Ok(())
    }
}
