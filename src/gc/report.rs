//! Run reports.

use super::ActionOutcome;
use crate::models::{Action, StoreKind};
use std::fmt::Write;

/// Result of one store pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReport {
    /// Store collected.
    pub store: StoreKind,
    /// Bucket or repository name.
    pub location: String,
    /// Assets counted before the pass.
    pub total: usize,
    /// Assets old enough to be considered.
    pub scanned: usize,
    /// Assets deleted.
    pub deleted: usize,
    /// Bytes deleted.
    pub deleted_bytes: u64,
    /// Assets newly tagged as isolated.
    pub tagged: usize,
    /// Assets whose isolation tag was removed.
    pub untagged: usize,
    /// Per-asset failures (logged, left for the next run).
    pub failures: usize,
}

impl StoreReport {
    /// Creates an empty report for `store` at `location`.
    #[must_use]
    pub fn new(store: StoreKind, location: impl Into<String>) -> Self {
        Self {
            store,
            location: location.into(),
            total: 0,
            scanned: 0,
            deleted: 0,
            deleted_bytes: 0,
            tagged: 0,
            untagged: 0,
            failures: 0,
        }
    }

    pub(crate) fn add_deleted(&mut self, outcome: ActionOutcome) {
        self.deleted += outcome.count;
        self.deleted_bytes += outcome.bytes;
        self.failures += outcome.failures;
    }

    pub(crate) fn add_tagged(&mut self, outcome: ActionOutcome) {
        self.tagged += outcome.count;
        self.failures += outcome.failures;
    }

    pub(crate) fn add_untagged(&mut self, outcome: ActionOutcome) {
        self.untagged += outcome.count;
        self.failures += outcome.failures;
    }
}

/// Result of collecting one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcReport {
    /// Environment collected.
    pub environment: String,
    /// Action the run was allowed to take.
    pub action: Action,
    /// Object storage pass, if it ran.
    pub objects: Option<StoreReport>,
    /// Image registry pass, if it ran.
    pub images: Option<StoreReport>,
    /// Duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl GcReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(environment: impl Into<String>, action: Action) -> Self {
        Self {
            environment: environment.into(),
            action,
            objects: None,
            images: None,
            duration_ms: 0,
        }
    }

    /// Reports of the passes that ran.
    pub fn stores(&self) -> impl Iterator<Item = &StoreReport> {
        self.objects.iter().chain(self.images.iter())
    }

    /// Total assets deleted across stores.
    #[must_use]
    pub fn total_deleted(&self) -> usize {
        self.stores().map(|s| s.deleted).sum()
    }

    /// Total assets tagged across stores.
    #[must_use]
    pub fn total_tagged(&self) -> usize {
        self.stores().map(|s| s.tagged).sum()
    }

    /// Returns a human-readable summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Garbage collection of {} ({}) finished in {}ms",
            self.environment, self.action, self.duration_ms
        );
        for store in self.stores() {
            let _ = write!(
                out,
                "\n  {} {}: scanned {} of {}, deleted {} ({} bytes), tagged {}, untagged {}",
                store.store,
                store.location,
                store.scanned,
                store.total,
                store.deleted,
                store.deleted_bytes,
                store.tagged,
                store.untagged
            );
            if store.failures > 0 {
                let _ = write!(out, ", {} failures", store.failures);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let mut report = GcReport::new("aws://123/us-east-1", Action::Full);
        let mut objects = StoreReport::new(StoreKind::Objects, "assets-bucket");
        objects.total = 10;
        objects.scanned = 8;
        objects.add_deleted(ActionOutcome {
            count: 3,
            bytes: 300,
            failures: 1,
        });
        report.objects = Some(objects);
        report.duration_ms = 42;

        let summary = report.summary();
        assert!(summary.contains("aws://123/us-east-1 (full)"));
        assert!(summary.contains("s3 assets-bucket: scanned 8 of 10, deleted 3 (300 bytes)"));
        assert!(summary.contains("1 failures"));
        assert_eq!(report.total_deleted(), 3);
        assert_eq!(report.total_tagged(), 0);
    }

    #[test]
    fn test_empty_summary() {
        let report = GcReport::new("aws://123/us-east-1", Action::Print);
        assert_eq!(report.stores().count(), 0);
        assert!(report.summary().contains("(print)"));
    }
}
