//! Error types for the scrape pipeline.

#![allow(dead_code)]

use thiserror::Error;

/// Errors produced by the download layer.
///
/// The retry predicate in the backoff wrapper keys off these variants:
/// `NotFound` is terminal, everything else is retried up to the attempt cap.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP 404 for {url}")]
    NotFound { url: String },
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request timed out: {url}")]
    Timeout { url: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response from {url}: {reason}")]
    Malformed { url: String, reason: String },
    #[error("retries exhausted for {url}: {last}")]
    RetriesExhausted { url: String, last: String },
}

impl DownloadError {
    /// Whether the backoff layer should retry this error.
    ///
    /// Timeouts and every HTTP status other than 404 are retriable; a 404
    /// is surfaced immediately.
    pub fn is_retriable(&self) -> bool {
        match self {
            DownloadError::NotFound { .. } => false,
            DownloadError::Malformed { .. } => false,
            DownloadError::RetriesExhausted { .. } => false,
            DownloadError::Timeout { .. } => true,
            DownloadError::Status { .. } => true,
            DownloadError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        }
    }
}

/// Top-level scrape errors.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("wiki API error {code}: {info}")]
    Api { code: String, info: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no usable renderer: remote endpoints unavailable and local fallback disabled")]
    NoRenderer,
    #[error("archive error: {0}")]
    Archive(String),
    #[error("render error for {article}: {reason}")]
    Render { article: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Fatal errors abort the whole run; everything else is counted and
    /// logged per article or per file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::Config(_)
                | ScrapeError::NoRenderer
                | ScrapeError::Archive(_)
                | ScrapeError::Api { .. }
        )
    }

    /// Short category label used for the one-line fatal report.
    pub fn category(&self) -> &'static str {
        match self {
            ScrapeError::Download(_) => "download",
            ScrapeError::Api { .. } => "api",
            ScrapeError::Config(_) => "config",
            ScrapeError::NoRenderer => "renderer",
            ScrapeError::Archive(_) => "archive",
            ScrapeError::Render { .. } => "render",
            ScrapeError::Io(_) => "io",
            ScrapeError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
