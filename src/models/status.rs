//! Run-wide counters and probed capabilities.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Success/failure pair for one phase; monotonically non-decreasing.
#[derive(Debug, Default)]
pub struct PhaseCounters {
    success: AtomicU64,
    fail: AtomicU64,
}

impl PhaseCounters {
    pub fn add_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fail(&self) {
        self.fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn fail(&self) -> u64 {
        self.fail.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.success() + self.fail()
    }
}

/// Progress counters shared by all workers.
#[derive(Debug, Default)]
pub struct ScrapeStatus {
    pub articles: PhaseCounters,
    pub files: PhaseCounters,
}

/// Upstream features probed once at startup.
///
/// The coordinates bit can be cleared later when the API warns that the
/// prop is unsupported; the REST and VE bits never change after the probe.
#[derive(Debug)]
pub struct Capabilities {
    rest_api: AtomicBool,
    ve_api: AtomicBool,
    coordinates: AtomicBool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            rest_api: AtomicBool::new(false),
            ve_api: AtomicBool::new(false),
            coordinates: AtomicBool::new(true),
        }
    }
}

impl Capabilities {
    pub fn rest_api(&self) -> bool {
        self.rest_api.load(Ordering::Relaxed)
    }

    pub fn ve_api(&self) -> bool {
        self.ve_api.load(Ordering::Relaxed)
    }

    pub fn coordinates(&self) -> bool {
        self.coordinates.load(Ordering::Relaxed)
    }

    pub fn set_rest_api(&self, value: bool) {
        self.rest_api.store(value, Ordering::Relaxed);
    }

    pub fn set_ve_api(&self, value: bool) {
        self.ve_api.store(value, Ordering::Relaxed);
    }

    pub fn set_coordinates(&self, value: bool) {
        self.coordinates.store(value, Ordering::Relaxed);
    }

    /// With every capability missing there is nothing left to render with.
    pub fn all_unavailable(&self) -> bool {
        !self.rest_api() && !self.ve_api() && !self.coordinates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let status = ScrapeStatus::default();
        status.articles.add_success();
        status.articles.add_success();
        status.articles.add_fail();
        assert_eq!(status.articles.success(), 2);
        assert_eq!(status.articles.fail(), 1);
        assert_eq!(status.articles.total(), 3);
    }

    #[test]
    fn test_capabilities_toggle() {
        let caps = Capabilities::default();
        assert!(caps.coordinates());
        caps.set_coordinates(false);
        assert!(!caps.coordinates());
        assert!(caps.all_unavailable());
        caps.set_rest_api(true);
        assert!(!caps.all_unavailable());
    }
}
