//! In-run typed key-value stores.
//!
//! Each namespace (`article_detail`, `files_to_download`, `files_to_retry`,
//! `redirects`) owns its records for the duration of a run. Workers get
//! owned copies during batch iteration and write back through the store
//! API; there is no shared mutable state outside the store itself.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::models::FileTask;

/// One typed store namespace.
#[derive(Debug)]
pub struct KvStore<T: Clone + Send + Sync + 'static> {
    name: &'static str,
    map: Arc<RwLock<HashMap<String, T>>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for KvStore<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            map: self.map.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> KvStore<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            map: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn insert(&self, key: impl Into<String>, value: T) {
        self.map.write().await.insert(key.into(), value);
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.map.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.map.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &str) -> Option<T> {
        self.map.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.map.read().await.keys().cloned().collect()
    }

    pub async fn clear(&self) {
        self.map.write().await.clear();
    }

    /// Run `f` over every entry with `workers` concurrent tasks.
    ///
    /// The key set is snapshotted up front and pushed onto a claim queue;
    /// each worker pops a key, re-reads the value (it may have been
    /// upgraded since the snapshot), and runs the callback. Entries
    /// inserted after the snapshot are not visited. The call returns when
    /// the queue drains.
    pub async fn iterate<F, Fut>(&self, workers: usize, f: F)
    where
        F: Fn(String, T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut keys = self.keys().await;
        keys.sort();
        let total = keys.len();
        debug!("iterating {} ({} entries, {} workers)", self.name, total, workers);
        let queue: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(keys.into()));

        let mut handles = Vec::with_capacity(workers.max(1));
        for _ in 0..workers.max(1) {
            let queue = queue.clone();
            let store = self.clone();
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let key = {
                        let mut q = queue.lock().await;
                        q.pop_front()
                    };
                    let Some(key) = key else { break };
                    if let Some(value) = store.get(&key).await {
                        f(key, value).await;
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl KvStore<FileTask> {
    /// Insert a download task, keeping the best resolution per path.
    ///
    /// An existing entry for the same archive path is replaced only when
    /// the incoming task has a strictly greater width or scale multiplier;
    /// otherwise the insert is a no-op.
    pub async fn insert_upgrading(&self, task: FileTask) {
        let mut map = self.map.write().await;
        match map.get(&task.path) {
            Some(existing) if !existing.is_upgraded_by(&task) => {
                debug!("{}: keeping existing entry for {}", self.name, task.path);
            }
            _ => {
                map.insert(task.path.clone(), task);
            }
        }
    }
}

/// The four namespaces of one run, created empty and cleared at the end.
#[derive(Debug, Clone)]
pub struct RunStores {
    pub article_detail: KvStore<crate::models::ArticleDetail>,
    pub files_to_download: KvStore<FileTask>,
    pub files_to_retry: KvStore<FileTask>,
    pub redirects: KvStore<crate::models::Redirect>,
}

impl RunStores {
    pub fn new() -> Self {
        Self {
            article_detail: KvStore::new("article_detail"),
            files_to_download: KvStore::new("files_to_download"),
            files_to_retry: KvStore::new("files_to_retry"),
            redirects: KvStore::new("redirects"),
        }
    }

    pub async fn clear_all(&self) {
        self.article_detail.clear().await;
        self.files_to_download.clear().await;
        self.files_to_retry.clear().await;
        self.redirects.clear().await;
    }
}

impl Default for RunStores {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store: KvStore<String> = KvStore::new("test");
        store.insert("a", "1".to_string()).await;
        assert_eq!(store.get("a").await.as_deref(), Some("1"));
        assert!(store.contains("a").await);
        assert_eq!(store.remove("a").await.as_deref(), Some("1"));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_iterate_visits_every_entry() {
        let store: KvStore<u32> = KvStore::new("test");
        for i in 0..50u32 {
            store.insert(format!("k{i}"), i).await;
        }
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        store
            .iterate(4, move |_k, _v| {
                let seen = seen2.clone();
                async move {
                    seen.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;
        assert_eq!(seen.load(Ordering::Relaxed), 50);
    }

    #[tokio::test]
    async fn test_resolution_upgrade_keeps_max() {
        let store: KvStore<FileTask> = KvStore::new("files_to_download");
        let mk = |w: Option<u32>, m: Option<f32>| FileTask {
            width: w,
            mult: m,
            ..FileTask::media("Foo.jpg", "https://u.org/Foo.jpg")
        };

        store.insert_upgrading(mk(Some(220), None)).await;
        store.insert_upgrading(mk(Some(110), None)).await;
        assert_eq!(store.get("Foo.jpg").await.and_then(|t| t.width), Some(220));

        store.insert_upgrading(mk(Some(440), None)).await;
        assert_eq!(store.get("Foo.jpg").await.and_then(|t| t.width), Some(440));

        store.insert_upgrading(mk(Some(440), Some(2.0))).await;
        let task = store.get("Foo.jpg").await.expect("present");
        assert_eq!(task.width, Some(440));
        assert_eq!(task.mult, Some(2.0));
    }

    #[tokio::test]
    async fn test_clear_all() {
        let stores = RunStores::new();
        stores
            .redirects
            .insert(
                "A",
                crate::models::Redirect {
                    from: "A".into(),
                    to: "B".into(),
                },
            )
            .await;
        stores.clear_all().await;
        assert!(stores.redirects.is_empty().await);
    }
}
