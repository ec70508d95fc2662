//! Site metadata fetched once at startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::utils::iso2_to_iso3;

/// Reading direction of the wiki's content language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    Ltr,
    Rtl,
}

impl TextDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ltr => "ltr",
            Self::Rtl => "rtl",
        }
    }
}

impl Default for TextDirection {
    fn default() -> Self {
        Self::Ltr
    }
}

/// One wiki namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i32,
    pub canonical: String,
    pub localized: String,
    pub is_content: bool,
    pub allows_subpages: bool,
}

/// Immutable site description, built once from the siteinfo query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WikiMetadata {
    /// Wiki base URL, trailing slash guaranteed.
    pub base_url: String,
    /// `api.php` endpoint, trailing slash guaranteed.
    pub api_url: String,
    /// REST endpoint prefix, trailing slash guaranteed.
    pub rest_url: String,
    /// Visual editor endpoint prefix, trailing slash guaranteed.
    pub ve_url: String,
    /// Every name variant (canonical, localized, case-flipped) maps to the
    /// same namespace record.
    pub namespaces: HashMap<String, Namespace>,
    /// Main-page title with spaces replaced by the space delimiter.
    pub main_page: String,
    pub text_direction: TextDirection,
    pub lang_iso2: String,
    pub lang_iso3: String,
    pub site_name: String,
    /// Approximate article count from site statistics, for progress output.
    pub article_count: u64,
}

impl WikiMetadata {
    /// Register a namespace under every name variant used by links.
    pub fn register_namespace(&mut self, ns: Namespace) {
        for name in [ns.canonical.clone(), ns.localized.clone()] {
            if name.is_empty() {
                continue;
            }
            self.register_alias(&name, ns.clone());
        }
        // Bare id 0 (article) namespace has empty names; keep it reachable.
        if ns.canonical.is_empty() && ns.localized.is_empty() {
            self.namespaces.insert(String::new(), ns);
        }
    }

    /// Register one alias plus its first-letter case variants.
    pub fn register_alias(&mut self, name: &str, ns: Namespace) {
        self.namespaces.insert(name.to_string(), ns.clone());
        if let Some(first) = name.chars().next() {
            let rest: String = name.chars().skip(1).collect();
            let lower = format!("{}{}", first.to_lowercase(), rest);
            let upper = format!("{}{}", first.to_uppercase(), rest);
            self.namespaces.insert(lower, ns.clone());
            self.namespaces.insert(upper, ns);
        }
    }

    /// Look up the namespace of a title by its prefix.
    pub fn namespace_of(&self, title: &str) -> Option<&Namespace> {
        let prefix = title.split_once(':').map(|(p, _)| p)?;
        self.namespaces.get(prefix)
    }

    /// Content namespaces, deduplicated by id.
    pub fn content_namespaces(&self) -> Vec<Namespace> {
        let mut seen = std::collections::HashSet::new();
        let mut out: Vec<Namespace> = self
            .namespaces
            .values()
            .filter(|ns| ns.is_content && seen.insert(ns.id))
            .cloned()
            .collect();
        out.sort_by_key(|ns| ns.id);
        out
    }

    /// Derive the ISO 639-3 code when the site only reports two letters.
    pub fn fill_iso3(&mut self) {
        if self.lang_iso3.is_empty() {
            self.lang_iso3 = iso2_to_iso3(&self.lang_iso2);
        }
    }
}

/// Append a trailing slash when missing.
pub fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}
