//! Bitmap image optimisation via external tools.
//!
//! Downloaded bitmaps pass through a fixed pipeline: pngquant then advpng
//! for PNG, jpegoptim for JPEG, gifsicle for GIF. A missing binary skips
//! that stage rather than failing the download.

use std::path::Path;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ImageOptimiser {
    /// Bounds concurrent subprocess work at `speed * 2`.
    pool: Arc<Semaphore>,
}

impl ImageOptimiser {
    pub fn new(speed: usize) -> Self {
        Self {
            pool: Arc::new(Semaphore::new(speed.max(1) * 2)),
        }
    }

    /// Whether a content type goes through the pipeline at all.
    pub fn handles(content_type: &str) -> bool {
        matches!(
            normalise(content_type),
            "image/png" | "image/jpeg" | "image/gif"
        )
    }

    /// Optimise `body` according to its content type.
    ///
    /// Returns the original bytes on any tool failure; optimisation is
    /// best-effort and must never lose a file.
    pub async fn optimise(&self, content_type: &str, body: Vec<u8>) -> Vec<u8> {
        let stages: &[&[&str]] = match normalise(content_type) {
            "image/png" => &[
                &["pngquant", "--force", "--output", "{out}", "{in}"],
                &["advpng", "-z", "-4", "{out}"],
            ],
            "image/jpeg" => &[&["jpegoptim", "--strip-all", "-m60", "{out}"]],
            "image/gif" => &[&["gifsicle", "-O3", "{in}", "-o", "{out}"]],
            _ => return body,
        };

        let _permit = match self.pool.acquire().await {
            Ok(p) => p,
            Err(_) => return body,
        };

        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => {
                warn!("optimiser tempdir failed: {e}");
                return body;
            }
        };
        let in_path = dir.path().join("in");
        let out_path = dir.path().join("out");
        if tokio::fs::write(&in_path, &body).await.is_err() {
            return body;
        }
        // Stages that edit in place start from a copy of the input.
        if tokio::fs::copy(&in_path, &out_path).await.is_err() {
            return body;
        }

        for stage in stages {
            if !run_stage(stage, &in_path, &out_path).await {
                return body;
            }
        }

        match tokio::fs::read(&out_path).await {
            Ok(optimised) if !optimised.is_empty() && optimised.len() <= body.len() => {
                debug!(
                    "optimised {content_type}: {} -> {} bytes",
                    body.len(),
                    optimised.len()
                );
                optimised
            }
            _ => body,
        }
    }
}

fn normalise(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}

/// Run one tool invocation; false means fall back to the original bytes.
async fn run_stage(template: &[&str], in_path: &Path, out_path: &Path) -> bool {
    let args: Vec<String> = template[1..]
        .iter()
        .map(|a| {
            a.replace("{in}", &in_path.to_string_lossy())
                .replace("{out}", &out_path.to_string_lossy())
        })
        .collect();
    match Command::new(template[0]).args(&args).output().await {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            debug!(
                "{} exited with {:?}; keeping original",
                template[0],
                output.status.code()
            );
            false
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} not installed; skipping optimisation", template[0]);
            false
        }
        Err(e) => {
            warn!("{} failed to run: {e}", template[0]);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_bitmap_types_only() {
        assert!(ImageOptimiser::handles("image/png"));
        assert!(ImageOptimiser::handles("image/jpeg; charset=binary"));
        assert!(ImageOptimiser::handles("image/gif"));
        assert!(!ImageOptimiser::handles("image/svg+xml"));
        assert!(!ImageOptimiser::handles("text/html"));
    }

    #[tokio::test]
    async fn test_unknown_type_passes_through() {
        let optimiser = ImageOptimiser::new(1);
        let body = vec![1, 2, 3];
        let out = optimiser.optimise("image/svg+xml", body.clone()).await;
        assert_eq!(out, body);
    }
}
