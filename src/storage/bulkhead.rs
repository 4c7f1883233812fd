//! Bulkhead pattern for provider calls.
//!
//! Tagging, untagging and tag reads have no batch API, so one call is made
//! per asset. A batch can hold a thousand assets; the bulkhead caps how many
//! of those calls are in flight at once so the provider is not flooded and
//! throttles the whole run.
//!
//! The calls run as futures on the calling task: concurrency here means
//! overlapping network waits, not extra threads.
//!
//! # Usage
//!
//! ```rust,ignore
//! use assetgc::storage::{BulkheadConfig, TaskBulkhead};
//!
//! let bulkhead = TaskBulkhead::new(BulkheadConfig::default(), "s3");
//! let results = bulkhead
//!     .run_all("get_object_tags", objects.iter().map(|o| o.load_tags(client)))
//!     .await;
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of concurrent provider calls.
pub const DEFAULT_MAX_CONCURRENT: usize = 50;

/// Configuration for the bulkhead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum concurrent calls allowed.
    ///
    /// Default: 50.
    pub max_concurrent: usize,

    /// Timeout for acquiring a permit in milliseconds (0 = wait indefinitely).
    ///
    /// Default: 0.
    pub acquire_timeout_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkheadConfig {
    /// Creates a new bulkhead configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            acquire_timeout_ms: 0,
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `ASSETGC_BULKHEAD_MAX_CONCURRENT` | Max concurrent calls | 50 |
    /// | `ASSETGC_BULKHEAD_ACQUIRE_TIMEOUT_MS` | Permit timeout | 0 |
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("ASSETGC_BULKHEAD_MAX_CONCURRENT")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_concurrent = parsed.max(1);
        }
        if let Ok(v) = std::env::var("ASSETGC_BULKHEAD_ACQUIRE_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.acquire_timeout_ms = parsed;
        }
        self
    }

    /// Sets the maximum concurrent calls.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the acquire timeout in milliseconds.
    #[must_use]
    pub const fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }
}

/// Semaphore-gated executor for per-asset provider calls.
#[derive(Debug, Clone)]
pub struct TaskBulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    name: &'static str,
}

impl TaskBulkhead {
    /// Creates a new bulkhead labelled `name` in metrics and logs.
    #[must_use]
    pub fn new(config: BulkheadConfig, name: &'static str) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            semaphore,
            name,
        }
    }

    /// Returns the current number of available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquires a permit, respecting the configured timeout.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        metrics::gauge!("gc_bulkhead_available_permits", "store" => self.name)
            .set(self.available_permits() as f64);

        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = if self.config.acquire_timeout_ms == 0 {
            acquire.await
        } else {
            let timeout = Duration::from_millis(self.config.acquire_timeout_ms);
            tokio::time::timeout(timeout, acquire).await.map_err(|_| {
                metrics::counter!(
                    "gc_bulkhead_rejections_total",
                    "store" => self.name,
                    "reason" => "timeout"
                )
                .increment(1);
                Error::operation(
                    "bulkhead_acquire",
                    format!(
                        "bulkhead acquire timed out after {}ms",
                        self.config.acquire_timeout_ms
                    ),
                )
            })?
        };

        permit.map_err(|e| Error::operation("bulkhead_acquire", e))
    }

    /// Executes one call with bulkhead protection.
    ///
    /// # Errors
    ///
    /// Returns an error if no permit could be acquired or the call fails.
    pub async fn execute<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.acquire_permit().await?;

        tracing::trace!(
            store = self.name,
            operation = operation,
            "Acquired bulkhead permit"
        );

        let result = call.await;

        tracing::trace!(
            store = self.name,
            operation = operation,
            success = result.is_ok(),
            "Released bulkhead permit"
        );

        result
    }

    /// Executes all calls, at most `max_concurrent` at a time.
    ///
    /// Results come back in input order. One failure does not stop the others.
    pub async fn run_all<T, F, I>(&self, operation: &'static str, calls: I) -> Vec<Result<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        let guarded = calls
            .into_iter()
            .map(|call| self.execute(operation, call));
        futures::future::join_all(guarded).await
    }
}
