//! Article metadata accumulated from the query API.

use serde::{Deserialize, Serialize};

/// A bare reference to another page, as returned by list queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRef {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pageid: Option<u64>,
}

impl PageRef {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            pageid: None,
        }
    }
}

/// One revision entry; only the id is carried through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub revid: u64,
}

/// Page image thumbnail metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub source: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Everything the pipeline knows about one article.
///
/// Built incrementally: the enumeration phase creates the record, prop
/// continuations deep-merge into it, and category pagination may split it
/// into shards linked through `prev_article_id` / `next_article_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleDetail {
    pub title: String,
    #[serde(default)]
    pub page_id: u64,
    #[serde(default)]
    pub namespace: i32,
    #[serde(default)]
    pub revisions: Vec<Revision>,
    /// `(latitude, longitude)` from the coordinates prop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<(f64, f64)>,
    #[serde(default)]
    pub redirects: Vec<PageRef>,
    #[serde(default)]
    pub categories: Vec<PageRef>,
    #[serde(default)]
    pub sub_categories: Vec<PageRef>,
    #[serde(default)]
    pub pages: Vec<PageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Thumbnail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_article_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_article_id: Option<String>,
}

/// Which prop lists a continuation page is allowed to merge.
///
/// The query API re-emits non-continued props from the start on every
/// continuation page; merging them again would duplicate list entries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MergeProps {
    pub revisions: bool,
    pub coordinates: bool,
    pub categories: bool,
    pub redirects: bool,
    pub page_images: bool,
}

impl MergeProps {
    /// Merge everything (the first response page).
    pub fn all() -> Self {
        Self {
            revisions: true,
            coordinates: true,
            categories: true,
            redirects: true,
            page_images: true,
        }
    }
}

impl ArticleDetail {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// The canonical revision id, when one was fetched.
    pub fn revision_id(&self) -> Option<u64> {
        self.revisions.first().map(|r| r.revid)
    }

    /// Deep-merge a partial detail from a continuation page.
    ///
    /// Lists append (deduplicated by title), scalars fill in only when
    /// absent. `props` restricts which lists are taken from `other`.
    pub fn merge(&mut self, other: ArticleDetail, props: MergeProps) {
        if self.page_id == 0 {
            self.page_id = other.page_id;
        }
        if self.namespace == 0 {
            self.namespace = other.namespace;
        }
        if props.revisions {
            for rev in other.revisions {
                if !self.revisions.iter().any(|r| r.revid == rev.revid) {
                    self.revisions.push(rev);
                }
            }
        }
        if props.coordinates && self.coordinates.is_none() {
            self.coordinates = other.coordinates;
        }
        if props.categories {
            merge_refs(&mut self.categories, other.categories);
        }
        if props.redirects {
            merge_refs(&mut self.redirects, other.redirects);
        }
        if props.page_images && self.thumbnail.is_none() {
            self.thumbnail = other.thumbnail;
        }
        merge_refs(&mut self.sub_categories, other.sub_categories);
        merge_refs(&mut self.pages, other.pages);
    }
}

fn merge_refs(into: &mut Vec<PageRef>, from: Vec<PageRef>) {
    for r in from {
        if !into.iter().any(|e| e.title == r.title) {
            into.push(r);
        }
    }
}

/// A redirect discovered during enumeration.
///
/// The source title is never itself present in the article store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redirect {
    pub from: String,
    pub to: String,
}

/// One pending media download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTask {
    /// Archive path within the namespace, unique per file.
    pub path: String,
    /// Upstream URL to fetch.
    pub url: String,
    /// Target archive namespace (`I` for media, `-` for assets).
    pub namespace: char,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mult: Option<f32>,
}

impl FileTask {
    pub fn media(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            namespace: 'I',
            width: None,
            mult: None,
        }
    }

    pub fn asset(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            namespace: '-',
            width: None,
            mult: None,
        }
    }

    /// Whether `other` is a strictly better resolution of the same file.
    pub fn is_upgraded_by(&self, other: &FileTask) -> bool {
        let wider = match (self.width, other.width) {
            (Some(a), Some(b)) => b > a,
            (None, Some(_)) => true,
            _ => false,
        };
        let denser = match (self.mult, other.mult) {
            (Some(a), Some(b)) => b > a,
            (None, Some(_)) => true,
            _ => false,
        };
        wider || denser
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(titles: &[&str]) -> Vec<PageRef> {
        titles.iter().map(|t| PageRef::new(*t)).collect()
    }

    #[test]
    fn test_merge_appends_without_duplicates() {
        let mut a = ArticleDetail::new("London");
        a.categories = refs(&["Category:Cities"]);
        let mut b = ArticleDetail::new("London");
        b.categories = refs(&["Category:Cities", "Category:Capitals"]);

        a.merge(b, MergeProps::all());
        assert_eq!(a.categories.len(), 2);
    }

    #[test]
    fn test_merge_respects_prop_filter() {
        let mut a = ArticleDetail::new("London");
        let mut b = ArticleDetail::new("London");
        b.categories = refs(&["Category:Capitals"]);
        b.redirects = refs(&["Londres"]);

        // Only the categories continuation is being followed.
        let props = MergeProps {
            categories: true,
            ..Default::default()
        };
        a.merge(b, props);
        assert_eq!(a.categories.len(), 1);
        assert!(a.redirects.is_empty());
    }

    #[test]
    fn test_merge_keeps_first_scalar() {
        let mut a = ArticleDetail::new("London");
        a.coordinates = Some((51.5, -0.12));
        let mut b = ArticleDetail::new("London");
        b.coordinates = Some((0.0, 0.0));

        a.merge(b, MergeProps::all());
        assert_eq!(a.coordinates, Some((51.5, -0.12)));
    }

    #[test]
    fn test_file_task_upgrade_rules() {
        let base = FileTask {
            width: Some(220),
            ..FileTask::media("Foo.jpg", "https://u.org/220px-Foo.jpg")
        };
        let wider = FileTask {
            width: Some(440),
            ..FileTask::media("Foo.jpg", "https://u.org/440px-Foo.jpg")
        };
        let narrower = FileTask {
            width: Some(110),
            ..FileTask::media("Foo.jpg", "https://u.org/110px-Foo.jpg")
        };
        assert!(base.is_upgraded_by(&wider));
        assert!(!base.is_upgraded_by(&narrower));
        assert!(!base.is_upgraded_by(&base));
    }

    #[test]
    fn test_file_task_mult_upgrade() {
        let base = FileTask::media("Foo.jpg", "https://u.org/Foo.jpg");
        let denser = FileTask {
            mult: Some(2.0),
            ..base.clone()
        };
        assert!(base.is_upgraded_by(&denser));
        assert!(!denser.is_upgraded_by(&base));
    }
}
