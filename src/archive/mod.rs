//! Archive output contract.
//!
//! The packaging library is a collaborator behind a narrow contract:
//! entries are appended under `(namespace, url)` keys and the archive is
//! finalized exactly once. The filesystem writer below is the default
//! sink; it lays entries out as `namespace/url` paths under the output
//! directory plus a JSON manifest for the reader.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, ScrapeError};

/// Reserved namespaces of the archive layout.
#[allow(dead_code)]
pub mod namespaces {
    /// Articles; indexable HTML.
    pub const ARTICLES: char = 'A';
    /// Images and other media.
    pub const MEDIA: char = 'I';
    /// Assets: JS, CSS, fonts.
    pub const ASSETS: char = '-';
    /// Category pages.
    pub const CATEGORIES: char = 'U';
    /// Archive metadata.
    pub const METADATA: char = 'M';
}

/// One archive entry.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub namespace: char,
    pub url: String,
    pub mime_type: String,
    /// Whether a reader's search index should cover this entry.
    pub indexable: bool,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn article(url: impl Into<String>, html: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace: namespaces::ARTICLES,
            url: url.into(),
            mime_type: "text/html".to_string(),
            indexable: true,
            data: html.into(),
        }
    }

    pub fn media(url: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            namespace: namespaces::MEDIA,
            url: url.into(),
            mime_type: mime_type.into(),
            indexable: false,
            data,
        }
    }

    pub fn asset(url: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            namespace: namespaces::ASSETS,
            url: url.into(),
            mime_type: mime_type.into(),
            indexable: false,
            data,
        }
    }
}

/// Append-only sink consumed by the orchestrator.
#[async_trait]
pub trait ArchiveWriter: Send + Sync {
    /// Add one entry; duplicate `(namespace, url)` keys are ignored.
    async fn add_entry(&self, entry: ArchiveEntry) -> Result<()>;

    /// Seal the archive. Further writes fail; calling twice fails.
    async fn finalize(&self) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    namespace: char,
    url: String,
    mime_type: String,
    indexable: bool,
    size: usize,
}

/// Directory-tree writer used as the default sink.
pub struct FsArchiveWriter {
    root: PathBuf,
    seen: Mutex<HashSet<(char, String)>>,
    manifest: Mutex<Vec<ManifestEntry>>,
    finalized: AtomicBool,
}

impl FsArchiveWriter {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            seen: Mutex::new(HashSet::new()),
            manifest: Mutex::new(Vec::new()),
            finalized: AtomicBool::new(false),
        }
    }

    fn entry_path(&self, namespace: char, url: &str) -> PathBuf {
        // Namespace '-' maps to a literal directory name.
        let ns_dir = if namespace == '-' {
            "assets".to_string()
        } else {
            namespace.to_string()
        };
        let mut path = self.root.join(ns_dir);
        for segment in url.split('/') {
            path.push(sanitize_segment(segment));
        }
        path
    }
}

/// Keep path segments filesystem-safe without losing uniqueness.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[async_trait]
impl ArchiveWriter for FsArchiveWriter {
    async fn add_entry(&self, entry: ArchiveEntry) -> Result<()> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(ScrapeError::Archive(format!(
                "write after finalize: {}/{}",
                entry.namespace, entry.url
            )));
        }
        {
            let mut seen = self.seen.lock().await;
            if !seen.insert((entry.namespace, entry.url.clone())) {
                debug!("duplicate archive entry {}/{}", entry.namespace, entry.url);
                return Ok(());
            }
        }

        let path = self.entry_path(entry.namespace, &entry.url);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScrapeError::Archive(e.to_string()))?;
        }
        tokio::fs::write(&path, &entry.data)
            .await
            .map_err(|e| ScrapeError::Archive(e.to_string()))?;

        self.manifest.lock().await.push(ManifestEntry {
            namespace: entry.namespace,
            url: entry.url,
            mime_type: entry.mime_type,
            indexable: entry.indexable,
            size: entry.data.len(),
        });
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(ScrapeError::Archive("archive already finalized".into()));
        }
        let manifest = self.manifest.lock().await;
        let json = serde_json::to_vec_pretty(&*manifest)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ScrapeError::Archive(e.to_string()))?;
        tokio::fs::write(self.root.join("manifest.json"), json)
            .await
            .map_err(|e| ScrapeError::Archive(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_entries_are_deduplicated() {
        let dir = tempdir().expect("tempdir");
        let writer = FsArchiveWriter::new(dir.path().to_path_buf());

        writer
            .add_entry(ArchiveEntry::article("London", "<p>1</p>"))
            .await
            .expect("add");
        writer
            .add_entry(ArchiveEntry::article("London", "<p>2</p>"))
            .await
            .expect("add dup");
        writer.finalize().await.expect("finalize");

        let content = std::fs::read_to_string(dir.path().join("A/London")).expect("read");
        assert_eq!(content, "<p>1</p>");
        let manifest =
            std::fs::read_to_string(dir.path().join("manifest.json")).expect("manifest");
        assert_eq!(manifest.matches("London").count(), 1);
    }

    #[tokio::test]
    async fn test_finalize_is_single_shot() {
        let dir = tempdir().expect("tempdir");
        let writer = FsArchiveWriter::new(dir.path().to_path_buf());
        writer.finalize().await.expect("first finalize");
        assert!(writer.finalize().await.is_err());
        assert!(writer
            .add_entry(ArchiveEntry::article("X", "<p/>"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_namespace_layout() {
        let dir = tempdir().expect("tempdir");
        let writer = FsArchiveWriter::new(dir.path().to_path_buf());
        writer
            .add_entry(ArchiveEntry::media("Foo.jpg", "image/jpeg", vec![1]))
            .await
            .expect("media");
        writer
            .add_entry(ArchiveEntry::asset("s/style.css", "text/css", vec![2]))
            .await
            .expect("asset");
        assert!(dir.path().join("I/Foo.jpg").exists());
        assert!(dir.path().join("assets/s/style.css").exists());
    }
}
