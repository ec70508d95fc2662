//! wikimirror - offline MediaWiki archiver.
//!
//! Discovers the articles of a live wiki, fetches their rendered HTML and
//! media, rewrites references to archive-local paths, and packs the
//! result into a single addressable archive for offline readers.

mod archive;
mod blob_cache;
mod cli;
mod config;
mod downloader;
mod error;
mod models;
mod renderer;
mod rewriter;
mod scraper;
mod store;
mod templates;
mod utils;
mod wiki;

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code reserved for uncaught panics.
const PANIC_EXIT_CODE: i32 = 42;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let default_filter = if cli::is_verbose() {
        "wikimirror=debug"
    } else {
        "wikimirror=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // A panic anywhere must produce a deterministic exit code after the
    // default hook has flushed its report.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(PANIC_EXIT_CODE);
    }));

    cli::run().await
}
