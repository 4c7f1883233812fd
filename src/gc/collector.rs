//! Garbage collector orchestration.

use super::images::{self, ImageBatchReader};
use super::objects::{self, ObjectBatchReader};
use super::{
    ActionOutcome, ActiveAssetCache, BackgroundStackRefresh, Classification, GcReport, StoreReport,
    classify, days_before, duration_to_millis, u64_to_f64, usize_to_u64,
};
use crate::config::GcConfig;
use crate::interaction::{
    Confirmation, ConfirmationResponse, NoopProgress, ProgressReporter, TerminalConfirmation,
};
use crate::models::{Asset, Environment, ImageAsset, ObjectAsset, StoreKind};
use crate::storage::bulkhead::TaskBulkhead;
use crate::storage::traits::{
    BootstrapLookup, ImageRegistryClient, ObjectStorageClient, StackClient,
};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// The collaborators a collector works against.
#[derive(Clone)]
pub struct GcClients {
    /// Object storage holding file assets.
    pub objects: Arc<dyn ObjectStorageClient>,
    /// Registry holding image assets.
    pub images: Arc<dyn ImageRegistryClient>,
    /// Control plane listing deployed stacks.
    pub stacks: Arc<dyn StackClient>,
    /// Bootstrap resource lookup.
    pub bootstrap: Arc<dyn BootstrapLookup>,
    /// Asked before deleting.
    pub confirmation: Arc<dyn Confirmation>,
    /// Told about progress.
    pub progress: Arc<dyn ProgressReporter>,
}

impl GcClients {
    /// Bundles the provider clients, prompting on the terminal and
    /// reporting no progress.
    #[must_use]
    pub fn new(
        objects: Arc<dyn ObjectStorageClient>,
        images: Arc<dyn ImageRegistryClient>,
        stacks: Arc<dyn StackClient>,
        bootstrap: Arc<dyn BootstrapLookup>,
    ) -> Self {
        Self {
            objects,
            images,
            stacks,
            bootstrap,
            confirmation: Arc::new(TerminalConfirmation),
            progress: Arc::new(NoopProgress),
        }
    }

    /// Sets the confirmation seam.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: Arc<dyn Confirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Sets the progress reporter.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }
}

impl std::fmt::Debug for GcClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcClients").finish_non_exhaustive()
    }
}

/// State shared by the batches of one run.
struct RunContext<'a> {
    cache: &'a ActiveAssetCache,
    refresher: &'a BackgroundStackRefresh,
}

/// Collects unreferenced assets of bootstrapped environments.
///
/// A "delete-all" answer to a confirmation prompt holds for the remaining
/// lifetime of the collector, including later environments.
#[derive(Debug)]
pub struct GarbageCollector {
    config: GcConfig,
    clients: GcClients,
    confirm: AtomicBool,
}

impl GarbageCollector {
    /// Creates a collector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `config` is invalid.
    pub fn new(config: GcConfig, clients: GcClients) -> Result<Self> {
        config.validate()?;
        let confirm = AtomicBool::new(config.confirm);
        Ok(Self {
            config,
            clients,
            confirm,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Collects each environment in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the error of the first environment that fails.
    pub async fn garbage_collect_environments(
        &self,
        environments: &[Environment],
    ) -> Result<Vec<GcReport>> {
        let mut reports = Vec::with_capacity(environments.len());
        for environment in environments {
            reports.push(self.garbage_collect(environment).await?);
        }
        Ok(reports)
    }

    /// Collects one environment.
    ///
    /// The object and image passes are independent: when one fails the other
    /// still runs, and the first error is returned afterwards. A declined
    /// confirmation ends the run at once. The background refresher is stopped
    /// on every path.
    ///
    /// # Errors
    ///
    /// - [`Error::BootstrapNotFound`] before anything is touched
    /// - [`Error::RefreshFailed`] if the initial refresh fails
    /// - [`Error::RefreshTimeout`] if the cache goes stale mid-pass
    /// - [`Error::Aborted`] if the operator declines a deletion
    /// - [`Error::OperationFailed`] for listing or whole-request delete failures
    #[instrument(
        name = "assetgc.gc",
        skip(self),
        fields(
            component = "gc",
            environment = %environment,
            action = %self.config.action,
            asset_type = %self.config.asset_type,
            rollback_buffer_days = self.config.rollback_buffer_days,
            created_buffer_days = self.config.created_buffer_days
        )
    )]
    pub async fn garbage_collect(&self, environment: &Environment) -> Result<GcReport> {
        let start = Instant::now();
        let bootstrap = self
            .clients
            .bootstrap
            .lookup(environment, &self.config.bootstrap_stack_name)
            .await?;
        debug!(
            bucket = %bootstrap.bucket_name,
            repository = %bootstrap.repository_name,
            qualifier = bootstrap.qualifier.as_deref().unwrap_or_default(),
            "Resolved bootstrap resources"
        );

        let cache = Arc::new(ActiveAssetCache::new());
        let refresher = BackgroundStackRefresh::new(
            Arc::clone(&self.clients.stacks),
            Arc::clone(&cache),
            bootstrap.qualifier.clone(),
        )
        .with_interval(self.config.refresh_interval);

        refresher.refresh_now().await?;
        refresher.start();

        let ctx = RunContext {
            cache: &cache,
            refresher: &refresher,
        };
        let mut report = GcReport::new(environment.to_string(), self.config.action);
        let mut first_error: Option<Error> = None;

        if self.config.asset_type.collects_objects() {
            match self.collect_objects(&ctx, &bootstrap.bucket_name).await {
                Ok(store) => report.objects = Some(store),
                Err(e) => {
                    error!(
                        error = %e,
                        bucket = %bootstrap.bucket_name,
                        "Object storage pass failed"
                    );
                    first_error = Some(e);
                },
            }
        }

        let aborted = matches!(first_error, Some(Error::Aborted(_)));
        if self.config.asset_type.collects_images() && !aborted {
            match self.collect_images(&ctx, &bootstrap.repository_name).await {
                Ok(store) => report.images = Some(store),
                Err(e) => {
                    error!(
                        error = %e,
                        repository = %bootstrap.repository_name,
                        "Image pass failed"
                    );
                    first_error.get_or_insert(e);
                },
            }
        }

        refresher.stop();
        report.duration_ms = duration_to_millis(start.elapsed());
        metrics::counter!(
            "gc_runs_total",
            "status" => if first_error.is_some() { "error" } else { "success" }
        )
        .increment(1);
        metrics::histogram!("gc_run_duration_ms").record(u64_to_f64(report.duration_ms));

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            deleted = report.total_deleted(),
            tagged = report.total_tagged(),
            duration_ms = report.duration_ms,
            "Garbage collection completed"
        );
        Ok(report)
    }

    #[instrument(name = "assetgc.gc.objects", skip(self, ctx), fields(component = "gc"))]
    async fn collect_objects(&self, ctx: &RunContext<'_>, bucket: &str) -> Result<StoreReport> {
        let client = self.clients.objects.as_ref();
        let progress = self.clients.progress.as_ref();
        let mut report = StoreReport::new(StoreKind::Objects, bucket);

        report.total = objects::count_objects(client, bucket).await?;
        debug!(objects = report.total, "Found bootstrap bucket");
        progress.begin(StoreKind::Objects, report.total);
        let result = self.object_batches(ctx, bucket, &mut report).await;
        progress.finish();
        result.map(|()| report)
    }

    async fn object_batches(
        &self,
        ctx: &RunContext<'_>,
        bucket: &str,
        report: &mut StoreReport,
    ) -> Result<()> {
        let client = self.clients.objects.as_ref();
        let bulkhead =
            TaskBulkhead::new(self.config.concurrency.clone(), StoreKind::Objects.as_str());
        let rollback_days = self.config.rollback_buffer_days;
        let now = Utc::now();
        let mut reader = ObjectBatchReader::new(
            client,
            bucket,
            self.config.object_batch_size,
            days_before(now, self.config.created_buffer_days),
            now,
        );

        while let Some(batch) = reader.next_batch().await? {
            ctx.refresher.no_older_than(self.config.max_staleness).await?;
            let scanned = batch.len();

            if rollback_days > 0 {
                objects::load_all_tags(client, &bulkhead, &batch).await?;
            }
            let buckets = classify(
                batch,
                |object: &ObjectAsset| ctx.cache.contains(object.file_name()),
                rollback_days,
                now,
            );
            log_classification(StoreKind::Objects, scanned, &buckets);

            if self.config.action.can_delete() && !buckets.deletable.is_empty() {
                self.confirm_deletion(buckets.deletable.len()).await?;
                let outcome = objects::delete_objects(client, bucket, &buckets.deletable).await?;
                self.clients.progress.report_deleted(outcome.count, outcome.bytes);
                record_outcome(StoreKind::Objects, "gc_assets_deleted_total", outcome);
                report.add_deleted(outcome);
            }
            if self.config.action.can_tag() && !buckets.taggable.is_empty() {
                let outcome =
                    objects::tag_objects(client, &bulkhead, bucket, &buckets.taggable, now).await;
                self.clients.progress.report_tagged(outcome.count, outcome.bytes);
                record_outcome(StoreKind::Objects, "gc_assets_tagged_total", outcome);
                report.add_tagged(outcome);
            }
            if self.config.action.can_tag() && !buckets.untaggable.is_empty() {
                let outcome =
                    objects::untag_objects(client, &bulkhead, bucket, &buckets.untaggable).await;
                record_outcome(StoreKind::Objects, "gc_assets_untagged_total", outcome);
                report.add_untagged(outcome);
            }

            report.scanned += scanned;
            self.clients.progress.report_scanned(scanned);
            metrics::counter!("gc_assets_scanned_total", "store" => StoreKind::Objects.as_str())
                .increment(usize_to_u64(scanned));
        }
        Ok(())
    }

    #[instrument(name = "assetgc.gc.images", skip(self, ctx), fields(component = "gc"))]
    async fn collect_images(
        &self,
        ctx: &RunContext<'_>,
        repository: &str,
    ) -> Result<StoreReport> {
        let client = self.clients.images.as_ref();
        let progress = self.clients.progress.as_ref();
        let mut report = StoreReport::new(StoreKind::Images, repository);

        report.total = images::count_images(client, repository).await?;
        debug!(images = report.total, "Found bootstrap repository");
        progress.begin(StoreKind::Images, report.total);
        let result = self.image_batches(ctx, repository, &mut report).await;
        progress.finish();
        result.map(|()| report)
    }

    async fn image_batches(
        &self,
        ctx: &RunContext<'_>,
        repository: &str,
        report: &mut StoreReport,
    ) -> Result<()> {
        let client = self.clients.images.as_ref();
        let bulkhead =
            TaskBulkhead::new(self.config.concurrency.clone(), StoreKind::Images.as_str());
        let rollback_days = self.config.rollback_buffer_days;
        let now = Utc::now();
        let mut reader = ImageBatchReader::new(
            client,
            repository,
            self.config.image_batch_size,
            days_before(now, self.config.created_buffer_days),
            now,
        );

        while let Some(batch) = reader.next_batch().await? {
            ctx.refresher.no_older_than(self.config.max_staleness).await?;
            let scanned = batch.len();

            let buckets = classify(
                batch,
                |image: &ImageAsset| image.tags.iter().any(|tag| ctx.cache.contains(tag)),
                rollback_days,
                now,
            );
            log_classification(StoreKind::Images, scanned, &buckets);

            if self.config.action.can_delete() && !buckets.deletable.is_empty() {
                self.confirm_deletion(buckets.deletable.len()).await?;
                let outcome =
                    images::delete_images(client, repository, &buckets.deletable).await?;
                self.clients.progress.report_deleted(outcome.count, outcome.bytes);
                record_outcome(StoreKind::Images, "gc_assets_deleted_total", outcome);
                report.add_deleted(outcome);
            }
            if self.config.action.can_tag() && !buckets.taggable.is_empty() {
                let outcome =
                    images::tag_images(client, &bulkhead, repository, &buckets.taggable, now).await;
                self.clients.progress.report_tagged(outcome.count, outcome.bytes);
                record_outcome(StoreKind::Images, "gc_assets_tagged_total", outcome);
                report.add_tagged(outcome);
            }
            if self.config.action.can_tag() && !buckets.untaggable.is_empty() {
                let outcome = images::untag_images(client, repository, &buckets.untaggable).await;
                record_outcome(StoreKind::Images, "gc_assets_untagged_total", outcome);
                report.add_untagged(outcome);
            }

            report.scanned += scanned;
            self.clients.progress.report_scanned(scanned);
            metrics::counter!("gc_assets_scanned_total", "store" => StoreKind::Images.as_str())
                .increment(usize_to_u64(scanned));
        }
        Ok(())
    }

    /// Asks before deleting `count` assets, unless confirmation is off.
    async fn confirm_deletion(&self, count: usize) -> Result<()> {
        if !self.confirm.load(Ordering::SeqCst) {
            return Ok(());
        }

        let prompt = format!(
            "Found {count} assets to delete based off of the following criteria:\n\
             - assets have been isolated for > {} days\n\
             - assets were created > {} days ago\n\n\
             Delete this batch (yes/no/delete-all)?",
            self.config.rollback_buffer_days, self.config.created_buffer_days
        );

        self.clients.progress.pause();
        let response = self.clients.confirmation.confirm(&prompt).await;
        self.clients.progress.resume();

        match response? {
            ConfirmationResponse::Yes => Ok(()),
            ConfirmationResponse::YesToAll => {
                self.confirm.store(false, Ordering::SeqCst);
                Ok(())
            },
            ConfirmationResponse::No => Err(Error::Aborted("deletion aborted by user".to_string())),
        }
    }
}

fn log_classification<A: Asset>(store: StoreKind, scanned: usize, buckets: &Classification<A>) {
    debug!(
        store = store.as_str(),
        total = scanned,
        isolated = buckets.isolated,
        referenced = buckets.referenced,
        deletable = buckets.deletable.len(),
        taggable = buckets.taggable.len(),
        untaggable = buckets.untaggable.len(),
        "Classified batch"
    );
}

fn record_outcome(store: StoreKind, counter: &'static str, outcome: ActionOutcome) {
    metrics::counter!(counter, "store" => store.as_str()).increment(usize_to_u64(outcome.count));
    if outcome.failures > 0 {
        metrics::counter!("gc_item_failures_total", "store" => store.as_str())
            .increment(usize_to_u64(outcome.failures));
    }
}
