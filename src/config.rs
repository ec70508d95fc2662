//! Run configuration and validation.

use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};

/// Orthogonal output flags derived from the format token.
///
/// Flags are recognised by substring match, so `nopic,nodet` and
/// `nopic_nodet` behave the same.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatFlags {
    /// Strip pictures (and videos, which cannot render without posters).
    pub nopic: bool,
    /// Strip videos only.
    pub novid: bool,
    /// Strip detail sections and the details blacklist.
    pub nodet: bool,
    /// Skip archive packaging (dry run of the pipeline).
    pub nozim: bool,
}

impl FormatFlags {
    pub fn parse(token: &str) -> Self {
        Self {
            nopic: token.contains("nopic"),
            novid: token.contains("novid"),
            nodet: token.contains("nodet"),
            nozim: token.contains("nozim"),
        }
    }

    /// Media elements are dropped when any stripping flag forbids them.
    pub fn strips_video(&self) -> bool {
        self.nopic || self.novid || self.nodet
    }

    pub fn strips_pictures(&self) -> bool {
        self.nopic
    }
}

/// Class and id lists driving the structural cleanup pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomLists {
    /// Elements with any of these classes are deleted outright.
    pub css_class_blacklist: Vec<String>,
    /// Deleted only when they contain no surviving link.
    pub css_class_blacklist_if_no_link: Vec<String>,
    /// Deleted additionally when detail stripping is active.
    pub css_class_details_blacklist: Vec<String>,
    /// Inline `display:none` is removed from these classes.
    pub css_class_display_list: Vec<String>,
    /// Class substrings scrubbed from every element's class attribute.
    pub css_class_call_blacklist: Vec<String>,
    /// Elements with these ids are deleted.
    pub id_blacklist: Vec<String>,
}

impl Default for DomLists {
    fn default() -> Self {
        Self {
            css_class_blacklist: vec![
                "noprint".into(),
                "metadata".into(),
                "ambox".into(),
                "stub".into(),
                "topicon".into(),
                "magnify".into(),
                "navbox".into(),
            ],
            css_class_blacklist_if_no_link: vec!["mainarticle".into(), "seealso".into()],
            css_class_details_blacklist: vec!["mw-ref".into(), "reflist".into()],
            css_class_display_list: vec!["thumb".into()],
            css_class_call_blacklist: vec!["plainlinks".into()],
            id_blacklist: vec!["purgelink".into()],
        }
    }
}

fn default_speed() -> usize {
    3
}

fn default_req_timeout_secs() -> u64 {
    60
}

fn default_space_delimiter() -> String {
    "_".to_string()
}

fn default_image_extensions() -> String {
    r"\.(jpe?g|png|gif|svg|webp)(\?.*)?$".to_string()
}

/// Everything a scrape run needs to know, resolved before phase 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Wiki base URL, e.g. `https://en.wikipedia.org`.
    pub wiki_url: String,
    /// Contact address advertised in the user agent; required upstream.
    pub admin_email: String,
    /// Output directory for the archive.
    pub out_dir: PathBuf,
    /// Base worker concurrency; HTTP slots scale from this.
    #[serde(default = "default_speed")]
    pub speed: usize,
    #[serde(default = "default_req_timeout_secs")]
    pub req_timeout_secs: u64,
    #[serde(default)]
    pub formats: FormatFlags,
    /// Optional line-per-title article list; full namespace walk otherwise.
    #[serde(default)]
    pub article_list: Option<PathBuf>,
    /// Scratch directory for the HTTP response cache.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Root of the optional content-addressed blob cache.
    #[serde(default)]
    pub blob_cache_dir: Option<PathBuf>,
    /// Keep scratch-cache files from previous runs at shutdown.
    #[serde(default)]
    pub skip_cache_cleaning: bool,
    /// Never spawn local parser services when remote endpoints fail.
    #[serde(default)]
    pub no_local_parser: bool,
    /// Command used to launch a local Parsoid service.
    #[serde(default)]
    pub local_parsoid_cmd: Option<String>,
    /// Command used to launch a local mobile-content service.
    #[serde(default)]
    pub local_mcs_cmd: Option<String>,
    /// Override the main page advertised by the site.
    #[serde(default)]
    pub main_page: Option<String>,
    /// Optional favicon path packaged into the archive.
    #[serde(default)]
    pub favicon: Option<PathBuf>,
    /// Archive creator string for the footer.
    #[serde(default)]
    pub creator: Option<String>,
    /// Delimiter replacing spaces in article ids.
    #[serde(default = "default_space_delimiter")]
    pub space_delimiter: String,
    /// Regex deciding which URLs go through the blob cache and optimiser.
    #[serde(default = "default_image_extensions")]
    pub image_extensions: String,
    /// Disable empty-section removal.
    #[serde(default)]
    pub keep_empty_sections: bool,
    /// Minify rewritten HTML.
    #[serde(default)]
    pub minify: bool,
    #[serde(default)]
    pub dom: DomLists,
}

impl ScrapeConfig {
    pub fn new(
        wiki_url: impl Into<String>,
        admin_email: impl Into<String>,
        out_dir: PathBuf,
    ) -> Self {
        Self {
            wiki_url: wiki_url.into(),
            admin_email: admin_email.into(),
            out_dir,
            speed: default_speed(),
            req_timeout_secs: default_req_timeout_secs(),
            formats: FormatFlags::default(),
            article_list: None,
            cache_dir: None,
            blob_cache_dir: None,
            skip_cache_cleaning: false,
            no_local_parser: false,
            local_parsoid_cmd: None,
            local_mcs_cmd: None,
            main_page: None,
            favicon: None,
            creator: None,
            space_delimiter: default_space_delimiter(),
            image_extensions: default_image_extensions(),
            keep_empty_sections: false,
            minify: false,
            dom: DomLists::default(),
        }
    }

    /// Reject bad configuration before enumeration begins.
    pub fn validate(&self) -> Result<()> {
        let email_re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex");
        if !email_re.is_match(&self.admin_email) {
            return Err(ScrapeError::Config(format!(
                "invalid admin email: {}",
                self.admin_email
            )));
        }
        if self.speed == 0 {
            return Err(ScrapeError::Config("speed must be at least 1".into()));
        }
        if self.wiki_url.is_empty() {
            return Err(ScrapeError::Config("wiki URL is required".into()));
        }
        if let Some(favicon) = &self.favicon {
            if !favicon.exists() {
                return Err(ScrapeError::Config(format!(
                    "favicon not found: {}",
                    favicon.display()
                )));
            }
        }
        if let Some(list) = &self.article_list {
            if !list.exists() {
                return Err(ScrapeError::Config(format!(
                    "article list not found: {}",
                    list.display()
                )));
            }
        }
        Regex::new(&self.image_extensions)
            .map_err(|e| ScrapeError::Config(format!("bad image extension regex: {e}")))?;
        Ok(())
    }

    pub fn user_agent(&self) -> String {
        format!(
            "wikimirror/{} ({})",
            env!("CARGO_PKG_VERSION"),
            self.admin_email
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ScrapeConfig {
        ScrapeConfig::new(
            "https://en.wikipedia.org",
            "ops@example.org",
            PathBuf::from("/tmp/out"),
        )
    }

    #[test]
    fn test_format_flags_substring_match() {
        let flags = FormatFlags::parse("nopic,nodet");
        assert!(flags.nopic);
        assert!(flags.nodet);
        assert!(!flags.novid);
        assert!(!flags.nozim);
        assert!(flags.strips_video());
        assert!(flags.strips_pictures());
    }

    #[test]
    fn test_novid_alone_keeps_pictures() {
        let flags = FormatFlags::parse("novid");
        assert!(flags.strips_video());
        assert!(!flags.strips_pictures());
    }

    #[test]
    fn test_validate_accepts_good_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_email() {
        let mut cfg = base_config();
        cfg.admin_email = "not-an-email".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_speed() {
        let mut cfg = base_config();
        cfg.speed = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_favicon() {
        let mut cfg = base_config();
        cfg.favicon = Some(PathBuf::from("/definitely/not/here.ico"));
        assert!(cfg.validate().is_err());
    }
}
