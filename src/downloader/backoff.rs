//! Exponential backoff around one logical request.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::DownloadError;

/// Maximum attempts for one logical request.
pub const FAIL_AFTER: u32 = 7;

/// Base delay doubled on every failed attempt.
const BASE_DELAY_MS: u64 = 250;

/// Run `op` until it succeeds, the retry predicate rejects the error, or
/// the attempt cap is reached.
///
/// The predicate sees every error; returning `false` surfaces it
/// immediately (a 404 never burns retries). Exhaustion wraps the last
/// error so callers can distinguish it from a terminal failure.
pub async fn with_backoff<T, F, Fut>(url: &str, op: F) -> Result<T, DownloadError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, DownloadError>>,
{
    let mut last: Option<DownloadError> = None;
    for attempt in 0..FAIL_AFTER {
        if attempt > 0 {
            let delay = Duration::from_millis(BASE_DELAY_MS << (attempt - 1).min(6));
            debug!("retrying {url} (attempt {}/{FAIL_AFTER}) after {delay:?}", attempt + 1);
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() => last = Some(err),
            Err(err) => return Err(err),
        }
    }
    Err(DownloadError::RetriesExhausted {
        url: url.to_string(),
        last: last
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let result = with_backoff("https://u.org/x", move || {
            let a = a.clone();
            async move {
                if a.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DownloadError::Status {
                        status: 500,
                        url: "https://u.org/x".into(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.expect("succeeds"), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_404_is_terminal_on_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let result: Result<(), _> = with_backoff("https://u.org/gone", move || {
            let a = a.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(DownloadError::NotFound {
                    url: "https://u.org/gone".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(DownloadError::NotFound { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_fail_after_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let result: Result<(), _> = with_backoff("https://u.org/x", move || {
            let a = a.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(DownloadError::Timeout {
                    url: "https://u.org/x".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(DownloadError::RetriesExhausted { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), FAIL_AFTER);
    }
}
