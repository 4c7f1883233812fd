//! Progress reporting.
//!
//! Reporting is observational only: reporters never block or fail a pass.

use crate::models::StoreKind;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Receives progress of a store pass.
pub trait ProgressReporter: Send + Sync {
    /// A pass over `store` starts; `total` assets were counted up front.
    fn begin(&self, store: StoreKind, total: usize);

    /// `count` more assets were scanned.
    fn report_scanned(&self, count: usize);

    /// `count` assets totalling `bytes` were tagged as isolated.
    fn report_tagged(&self, count: usize, bytes: u64);

    /// `count` assets totalling `bytes` were deleted.
    fn report_deleted(&self, count: usize, bytes: u64);

    /// Output is suspended while the operator is prompted.
    fn pause(&self) {}

    /// Output resumes after a prompt.
    fn resume(&self) {}

    /// The pass is over, successfully or not.
    fn finish(&self);
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn begin(&self, _store: StoreKind, _total: usize) {}
    fn report_scanned(&self, _count: usize) {}
    fn report_tagged(&self, _count: usize, _bytes: u64) {}
    fn report_deleted(&self, _count: usize, _bytes: u64) {}
    fn finish(&self) {}
}

/// Point-in-time view of a [`ProgressTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Assets counted before the pass.
    pub total: usize,
    /// Assets scanned.
    pub scanned: usize,
    /// Assets tagged.
    pub tagged: usize,
    /// Bytes tagged.
    pub tagged_bytes: u64,
    /// Assets deleted.
    pub deleted: usize,
    /// Bytes deleted.
    pub deleted_bytes: u64,
}

impl ProgressSnapshot {
    /// Percentage of the total scanned, in `0.0..=100.0`.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let scanned = f64::from(u32::try_from(self.scanned).unwrap_or(u32::MAX));
        let total = f64::from(u32::try_from(self.total).unwrap_or(u32::MAX));
        (scanned / total * 100.0).min(100.0)
    }
}

/// Counts progress and logs it through `tracing`.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    store: Mutex<Option<StoreKind>>,
    total: AtomicUsize,
    scanned: AtomicUsize,
    tagged: AtomicUsize,
    tagged_bytes: AtomicU64,
    deleted: AtomicUsize,
    deleted_bytes: AtomicU64,
    paused: AtomicBool,
}

impl ProgressTracker {
    /// Creates an idle tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current counts.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            scanned: self.scanned.load(Ordering::Relaxed),
            tagged: self.tagged.load(Ordering::Relaxed),
            tagged_bytes: self.tagged_bytes.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            deleted_bytes: self.deleted_bytes.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` while a prompt is showing.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn store_label(&self) -> &'static str {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map_or("unknown", StoreKind::as_str)
    }

    fn log(&self) {
        if self.is_paused() {
            return;
        }
        let snapshot = self.snapshot();
        info!(
            store = self.store_label(),
            scanned = snapshot.scanned,
            total = snapshot.total,
            percent = %format!("{:.2}", snapshot.percent()),
            tagged = snapshot.tagged,
            tagged_bytes = snapshot.tagged_bytes,
            deleted = snapshot.deleted,
            deleted_bytes = snapshot.deleted_bytes,
            "Garbage collection progress"
        );
    }
}

impl ProgressReporter for ProgressTracker {
    fn begin(&self, store: StoreKind, total: usize) {
        *self.store.lock().unwrap_or_else(PoisonError::into_inner) = Some(store);
        self.total.store(total, Ordering::Relaxed);
        self.scanned.store(0, Ordering::Relaxed);
        self.tagged.store(0, Ordering::Relaxed);
        self.tagged_bytes.store(0, Ordering::Relaxed);
        self.deleted.store(0, Ordering::Relaxed);
        self.deleted_bytes.store(0, Ordering::Relaxed);
        self.paused.store(false, Ordering::Relaxed);
    }

    fn report_scanned(&self, count: usize) {
        self.scanned.fetch_add(count, Ordering::Relaxed);
        self.log();
    }

    fn report_tagged(&self, count: usize, bytes: u64) {
        self.tagged.fetch_add(count, Ordering::Relaxed);
        self.tagged_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn report_deleted(&self, count: usize, bytes: u64) {
        self.deleted.fetch_add(count, Ordering::Relaxed);
        self.deleted_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.paused.store(false, Ordering::Relaxed);
        self.log();
    }
}
