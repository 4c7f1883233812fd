//! Background refresh of the active asset cache.
//!
//! A collection run can take hours on a large bucket. Stacks deployed during
//! that time reference assets the run has not seen, so the cache is rebuilt
//! periodically by a background task, and every batch first waits until the
//! cache is younger than a staleness bound.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──refresh_now()──► start() ──► [sleep interval] ──► refresh ──┐
//!                                           ▲                         │
//!                                           └─────────────────────────┘
//!                                   stop() / drop ──► task exits at next wakeup
//! ```
//!
//! A failed refresh ends the task. The last refresh time then never advances,
//! and every later [`BackgroundStackRefresh::no_older_than`] call past the
//! bound times out. Collection never proceeds on data of unknown age.

use super::ActiveAssetCache;
use super::{duration_to_millis, u64_to_f64};
use crate::storage::traits::StackClient;
use crate::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Default delay between background refreshes (5 minutes).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default staleness bound for acting on cache data (10 minutes).
pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(10 * 60);

/// Fetches the reference blob of every deployed stack.
///
/// Stacks that cannot hold live assets (failed creates, deletes, stacks under
/// review) are skipped, and so are stacks bootstrapped under a different
/// `qualifier`.
///
/// # Errors
///
/// Returns an error if any listing or template call fails.
pub async fn fetch_all_stack_templates(
    client: &dyn StackClient,
    qualifier: Option<&str>,
) -> Result<Vec<String>> {
    let mut stacks = Vec::new();
    let mut next_token: Option<String> = None;
    loop {
        let page = client.list_stacks(next_token.as_deref()).await?;
        stacks.extend(
            page.stacks
                .into_iter()
                .filter(|stack| stack.status.holds_live_assets()),
        );
        next_token = page.next_token;
        if next_token.is_none() {
            break;
        }
    }

    debug!(stacks = stacks.len(), "Parsing deployed stack templates");

    let mut templates = Vec::with_capacity(stacks.len());
    for stack in &stacks {
        let reference = stack.reference();
        let summary = client.get_template_summary(reference).await?;
        if summary.belongs_to_other_qualifier(qualifier) {
            debug!(
                stack = %stack.stack_name,
                qualifier = summary.bootstrap_qualifier().unwrap_or_default(),
                "Skipping stack bootstrapped under another qualifier"
            );
            continue;
        }

        let body = client.get_template(reference).await?;
        templates.push(format!("{body}{}", summary.parameters_json()));
    }

    Ok(templates)
}

/// Refreshes `cache` from the deployed stacks.
///
/// Returns the number of stacks remembered.
///
/// # Errors
///
/// Returns [`Error::RefreshFailed`] if the stack templates cannot be read.
#[instrument(
    name = "assetgc.refresh",
    skip(client, cache),
    fields(component = "gc", operation = "refresh")
)]
pub async fn refresh_stacks(
    client: &dyn StackClient,
    cache: &ActiveAssetCache,
    qualifier: Option<&str>,
) -> Result<usize> {
    let start = std::time::Instant::now();
    let templates = fetch_all_stack_templates(client, qualifier)
        .await
        .map_err(|e| {
            metrics::counter!("gc_stack_refresh_total", "status" => "error").increment(1);
            Error::RefreshFailed(e.to_string())
        })?;

    let count = templates.len();
    for template in templates {
        cache.remember_stack(template);
    }

    let duration_ms = duration_to_millis(start.elapsed());
    metrics::counter!("gc_stack_refresh_total", "status" => "success").increment(1);
    metrics::histogram!("gc_stack_refresh_duration_ms").record(u64_to_f64(duration_ms));
    debug!(stacks = count, duration_ms, "Refreshed active assets");

    Ok(count)
}

struct RefreshState {
    client: Arc<dyn StackClient>,
    cache: Arc<ActiveAssetCache>,
    qualifier: Option<String>,
    last_refresh: Mutex<Instant>,
    refreshed: Notify,
}

impl RefreshState {
    async fn refresh(&self) -> Result<()> {
        refresh_stacks(self.client.as_ref(), &self.cache, self.qualifier.as_deref()).await?;
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.refreshed.notify_waiters();
        Ok(())
    }

    fn age(&self) -> Duration {
        self.last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

/// Periodically repopulates an [`ActiveAssetCache`].
///
/// Owned by one collection run: created at its start, stopped at its end. The
/// last refresh time starts at construction, since the caller refreshes once
/// synchronously before calling [`Self::start`].
pub struct BackgroundStackRefresh {
    state: Arc<RefreshState>,
    interval: Duration,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl std::fmt::Debug for BackgroundStackRefresh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundStackRefresh")
            .field("interval", &self.interval)
            .field("qualifier", &self.state.qualifier)
            .field("last_refresh_age", &self.last_refresh_age())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl BackgroundStackRefresh {
    /// Creates an idle refresher feeding `cache`.
    #[must_use]
    pub fn new(
        client: Arc<dyn StackClient>,
        cache: Arc<ActiveAssetCache>,
        qualifier: Option<String>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            state: Arc::new(RefreshState {
                client,
                cache,
                qualifier,
                last_refresh: Mutex::new(Instant::now()),
                refreshed: Notify::new(),
            }),
            interval: DEFAULT_REFRESH_INTERVAL,
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    /// Sets the delay between refreshes.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Refreshes the cache on the calling task and releases waiters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshFailed`] if the stack templates cannot be read.
    pub async fn refresh_now(&self) -> Result<()> {
        self.state.refresh().await
    }

    /// Starts the background task. The first refresh fires one interval from now.
    ///
    /// Calling `start` on a running refresher does nothing.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return;
        }

        let state = Arc::clone(&self.state);
        let interval = self.interval;
        let stop_rx = self.stop_tx.subscribe();
        *handle = Some(tokio::spawn(run(state, interval, stop_rx)));
        debug!(interval_ms = duration_to_millis(interval), "Started background stack refresh");
    }

    /// Suppresses further refreshes.
    ///
    /// A refresh already in flight runs to completion.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Returns `true` while the background task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Time since the last completed refresh.
    #[must_use]
    pub fn last_refresh_age(&self) -> Duration {
        self.state.age()
    }

    /// Waits until the cache is no older than `max_age`.
    ///
    /// Returns immediately if the last refresh is recent enough. Otherwise
    /// suspends until the next refresh lands, or fails once `max_age` has
    /// elapsed without one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshTimeout`] if no refresh completes in time.
    pub async fn no_older_than(&self, max_age: Duration) -> Result<()> {
        // Registered before the age check so a refresh landing in between is
        // not missed.
        let notified = self.state.refreshed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let age = self.state.age();
        if age <= max_age {
            return Ok(());
        }

        debug!(
            age_ms = duration_to_millis(age),
            max_age_ms = duration_to_millis(max_age),
            "Active assets are stale, waiting for the next refresh"
        );
        tokio::time::timeout(max_age, notified)
            .await
            .map_err(|_| Error::RefreshTimeout {
                max_age_ms: duration_to_millis(max_age),
            })
    }
}

impl Drop for BackgroundStackRefresh {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    state: Arc<RefreshState>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut next = Instant::now() + interval;
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            () = tokio::time::sleep_until(next) => {},
        }
        if *stop_rx.borrow() {
            break;
        }

        let started = Instant::now();
        if let Err(e) = state.refresh().await {
            warn!(error = %e, "Background stack refresh failed; no further refreshes will run");
            return Err(e);
        }
        // Anchored at the start of the refresh so slow refreshes do not drift.
        next = started + interval;
    }

    info!("Background stack refresh stopped");
    Ok(())
}
