//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;
use console::style;

use crate::config::{FormatFlags, ScrapeConfig};
use crate::error::ScrapeError;

/// Produce an offline archive of a MediaWiki site.
#[derive(Debug, Parser)]
#[command(name = "wikimirror", version, about)]
pub struct Cli {
    /// Wiki base URL, e.g. https://en.wikipedia.org
    #[arg(long)]
    pub url: String,

    /// Contact email advertised in the user agent
    #[arg(long)]
    pub admin_email: String,

    /// Output directory
    #[arg(long, default_value = "out")]
    pub out: PathBuf,

    /// Base worker concurrency
    #[arg(long, default_value_t = 3)]
    pub speed: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub req_timeout: u64,

    /// Format token; recognises nopic, novid, nodet, nozim substrings
    #[arg(long, default_value = "")]
    pub format: String,

    /// File with one article title per line; full wiki otherwise
    #[arg(long)]
    pub article_list: Option<PathBuf>,

    /// Scratch directory for the HTTP response cache
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Root of the content-addressed image cache
    #[arg(long)]
    pub optimisation_cache: Option<PathBuf>,

    /// Keep scratch-cache files from earlier runs
    #[arg(long)]
    pub skip_cache_cleaning: bool,

    /// Never spawn local parser services as a fallback
    #[arg(long)]
    pub no_local_parser: bool,

    /// Override the landing page
    #[arg(long)]
    pub main_page: Option<String>,

    /// Favicon file packaged into the archive
    #[arg(long)]
    pub favicon: Option<PathBuf>,

    /// Creator string for the article footer
    #[arg(long)]
    pub creator: Option<String>,

    /// Minify rewritten HTML
    #[arg(long)]
    pub minify: bool,

    /// Keep section headings with no content
    #[arg(long)]
    pub keep_empty_sections: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_config(self) -> ScrapeConfig {
        let mut config = ScrapeConfig::new(self.url, self.admin_email, self.out);
        config.speed = self.speed;
        config.req_timeout_secs = self.req_timeout;
        config.formats = FormatFlags::parse(&self.format);
        config.article_list = self.article_list;
        config.cache_dir = self.cache_dir;
        config.blob_cache_dir = self.optimisation_cache;
        config.skip_cache_cleaning = self.skip_cache_cleaning;
        config.no_local_parser = self.no_local_parser;
        config.main_page = self.main_page;
        config.favicon = self.favicon;
        config.creator = self.creator;
        config.minify = self.minify;
        config.keep_empty_sections = self.keep_empty_sections;
        config
    }
}

/// Whether `-v` / `--verbose` was passed, readable before clap runs.
pub fn is_verbose() -> bool {
    std::env::args().any(|a| a == "-v" || a == "--verbose")
}

/// Parse arguments and drive a scrape to completion.
pub async fn run() -> std::process::ExitCode {
    let cli = Cli::parse();
    let config = cli.into_config();

    println!(
        "{} mirroring {} into {}",
        style("→").cyan(),
        config.wiki_url,
        config.out_dir.display()
    );

    match crate::scraper::run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            report_fatal(&e);
            std::process::ExitCode::FAILURE
        }
    }
}

fn report_fatal(error: &ScrapeError) {
    eprintln!(
        "{} fatal ({}): {error}",
        style("✗").red(),
        error.category()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_to_config() {
        let cli = Cli::parse_from([
            "wikimirror",
            "--url",
            "https://en.wikipedia.org",
            "--admin-email",
            "ops@example.org",
            "--format",
            "nopic,nodet",
            "--speed",
            "5",
        ]);
        let config = cli.into_config();
        assert_eq!(config.speed, 5);
        assert!(config.formats.nopic);
        assert!(config.formats.nodet);
        assert!(!config.formats.novid);
        assert!(config.validate().is_ok());
    }
}
