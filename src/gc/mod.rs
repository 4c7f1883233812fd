//! Garbage collection of deployment assets.
//!
//! # Overview
//!
//! One run collects one bootstrapped environment:
//!
//! 1. Look up the bootstrap bucket, repository and qualifier.
//! 2. Refresh the [`ActiveAssetCache`] once, then keep it fresh with a
//!    [`BackgroundStackRefresh`].
//! 3. Stream each store in batches. Per batch: skip young assets, wait until
//!    the cache is fresh enough, [`classify`], then delete, tag and untag.
//! 4. Stop the refresher, whatever happened.
//!
//! # Two-phase delete
//!
//! With a rollback buffer of `N > 0` days an unreferenced asset is first
//! tagged as isolated and only deleted once that tag is older than `N` days.
//! An asset that becomes referenced again in the meantime has its tag
//! removed. With `N = 0` unreferenced assets are deleted immediately.
//!
//! # Example
//!
//! ```rust,ignore
//! use assetgc::gc::{GarbageCollector, GcClients};
//!
//! let clients = GcClients::new(objects, images, stacks, bootstrap);
//! let config = GcConfig::default().with_rollback_buffer_days(3);
//! let collector = GarbageCollector::new(config, clients)?;
//! let report = collector.garbage_collect(&environment).await?;
//! println!("{}", report.summary());
//! ```

mod cache;
mod classify;
mod collector;
pub mod images;
pub mod objects;
mod refresh;
mod report;

pub use cache::ActiveAssetCache;
pub use classify::{Classification, DAY_MS, classify, days_before};
pub use collector::{GarbageCollector, GcClients};
pub use refresh::{
    BackgroundStackRefresh, DEFAULT_MAX_STALENESS, DEFAULT_REFRESH_INTERVAL,
    fetch_all_stack_templates, refresh_stacks,
};
pub use report::{GcReport, StoreReport};

use std::time::Duration;

/// Result of applying one action to a set of assets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Assets the action succeeded on.
    pub count: usize,
    /// Total size of those assets.
    pub bytes: u64,
    /// Assets the action failed on.
    pub failures: usize,
}

impl ActionOutcome {
    fn record(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }
}

/// Safely converts Duration to milliseconds as u64, capping at `u64::MAX`.
#[inline]
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Converts usize to u64 for metrics counters.
#[inline]
pub(crate) fn usize_to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Converts u64 to f64 for metrics, capping at `u32::MAX`.
#[inline]
pub(crate) fn u64_to_f64(value: u64) -> f64 {
    let capped = u32::try_from(value).unwrap_or(u32::MAX);
    f64::from(capped)
}
