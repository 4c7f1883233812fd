//! Garbage collection scenarios against the in-memory backends.
//!
//! Each test builds a bootstrapped environment (bucket, repository and a set
//! of deployed stacks), runs a full collection and inspects what survived.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use assetgc::config::GcConfig;
use assetgc::gc::{GarbageCollector, GcClients};
use assetgc::interaction::{ProgressTracker, ScriptedConfirmation};
use assetgc::models::{
    Action, AssetType, BootstrapInfo, Environment, IMAGE_ISOLATED_TAG, ImageAsset,
    OBJECT_ISOLATED_TAG, ObjectAsset, StackStatus, Tag,
};
use assetgc::storage::traits::{DeleteOutcome, ObjectPage, ObjectStorageClient};
use assetgc::storage::{
    InMemoryImageRegistry, InMemoryObjectStore, InMemoryStackClient, StaticBootstrapLookup,
};
use assetgc::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const BUCKET: &str = "cdk-assets-bucket";
const REPOSITORY: &str = "cdk-assets-repo";

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    objects: Arc<InMemoryObjectStore>,
    images: Arc<InMemoryImageRegistry>,
    stacks: Arc<InMemoryStackClient>,
    confirmation: Arc<ScriptedConfirmation>,
    progress: Arc<ProgressTracker>,
}

impl Harness {
    fn new() -> Self {
        Self::with_stores(InMemoryObjectStore::new(), InMemoryImageRegistry::new())
    }

    fn with_stores(objects: InMemoryObjectStore, images: InMemoryImageRegistry) -> Self {
        Self {
            objects: Arc::new(objects),
            images: Arc::new(images),
            stacks: Arc::new(InMemoryStackClient::new()),
            confirmation: Arc::new(ScriptedConfirmation::new(Vec::<String>::new())),
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    fn answering(mut self, answers: &[&str]) -> Self {
        self.confirmation = Arc::new(ScriptedConfirmation::new(answers.iter().copied()));
        self
    }

    fn collector(&self, config: GcConfig) -> GarbageCollector {
        self.collector_with_objects(config, self.objects.clone())
    }

    fn collector_with_objects(
        &self,
        config: GcConfig,
        objects: Arc<dyn ObjectStorageClient>,
    ) -> GarbageCollector {
        let bootstrap = StaticBootstrapLookup::new()
            .with_stack("CDKToolkit", BootstrapInfo::new(BUCKET, REPOSITORY, None));
        let clients = GcClients::new(
            objects,
            self.images.clone(),
            self.stacks.clone(),
            Arc::new(bootstrap),
        )
        .with_confirmation(self.confirmation.clone())
        .with_progress(self.progress.clone());
        GarbageCollector::new(config, clients).expect("valid config")
    }

    fn deploy(&self, name: &str, template: &str) {
        self.stacks
            .add_stack(name, StackStatus::UpdateComplete, template, None);
    }

    fn object(&self, key: &str, age_days: i64, tags: Vec<Tag>) {
        self.objects
            .put_object(BUCKET, key, 100, Some(days_ago(age_days)), tags);
    }

    fn image(&self, digest: &str, tags: &[&str], age_days: i64) {
        self.images.put_image_record(
            REPOSITORY,
            digest,
            tags.iter().map(ToString::to_string).collect(),
            1000,
            Some(days_ago(age_days)),
        );
    }
}

/// Object store whose listings are slow and wedge the control plane, so the
/// background refresh never lands.
struct WedgingObjectStore {
    inner: Arc<InMemoryObjectStore>,
    stacks: Arc<InMemoryStackClient>,
}

#[async_trait]
impl ObjectStorageClient for WedgingObjectStore {
    async fn list_objects(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        self.stacks.stall();
        tokio::time::sleep(std::time::Duration::from_secs(6 * 60)).await;
        self.inner.list_objects(bucket, continuation).await
    }

    async fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<Tag>> {
        self.inner.get_object_tags(bucket, key).await
    }

    async fn put_object_tags(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<()> {
        self.inner.put_object_tags(bucket, key, tags).await
    }

    async fn delete_object_tags(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner.delete_object_tags(bucket, key).await
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
        quiet: bool,
    ) -> Result<DeleteOutcome> {
        self.inner.delete_objects(bucket, keys, quiet).await
    }
}

fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

fn environment() -> Environment {
    Environment::new("test", "123456789012", "us-east-1")
}

fn unconfirmed() -> GcConfig {
    GcConfig::default().with_confirm(false)
}

fn object_isolation_tag(days: i64) -> Tag {
    Tag::new(
        OBJECT_ISOLATED_TAG,
        ObjectAsset::build_isolation_value(days_ago(days)),
    )
}

fn image_isolation_tag(days: i64) -> String {
    ImageAsset::build_isolation_tag(0, days_ago(days).timestamp_millis())
}

fn has_object_isolation(harness: &Harness, key: &str) -> bool {
    harness
        .objects
        .object_tags(BUCKET, key)
        .unwrap_or_default()
        .iter()
        .any(|tag| tag.key == OBJECT_ISOLATED_TAG)
}

// ============================================================================
// Object storage
// ============================================================================

#[tokio::test]
async fn test_immediate_delete_without_rollback_buffer() {
    let harness = Harness::new();
    for key in ["aaa.zip", "bbb.zip", "ccc.json"] {
        harness.object(key, 30, vec![]);
    }

    let report = harness
        .collector(unconfirmed().with_asset_type(AssetType::S3))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert_eq!(harness.objects.object_count(BUCKET), 0);
    let stats = harness.objects.stats();
    assert_eq!(stats.put_tag_calls, 0);
    assert_eq!(stats.get_tag_calls, 0);
    let objects = report.objects.expect("object pass ran");
    assert_eq!(objects.deleted, 3);
    assert_eq!(objects.deleted_bytes, 300);
    assert!(report.images.is_none());
}

#[tokio::test]
async fn test_stale_isolation_deletes_and_new_isolation_tags() {
    let harness = Harness::new();
    harness.object("stale.zip", 30, vec![object_isolation_tag(10)]);
    harness.object("fresh1.zip", 30, vec![]);
    harness.object("fresh2.zip", 30, vec![]);

    let report = harness
        .collector(
            unconfirmed()
                .with_asset_type(AssetType::S3)
                .with_rollback_buffer_days(3),
        )
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert!(!harness.objects.contains(BUCKET, "stale.zip"));
    assert!(harness.objects.contains(BUCKET, "fresh1.zip"));
    assert!(harness.objects.contains(BUCKET, "fresh2.zip"));
    assert!(has_object_isolation(&harness, "fresh1.zip"));
    assert!(has_object_isolation(&harness, "fresh2.zip"));

    let objects = report.objects.expect("object pass ran");
    assert_eq!(objects.deleted, 1);
    assert_eq!(objects.tagged, 2);
    assert_eq!(objects.untagged, 0);
}

#[tokio::test]
async fn test_young_objects_are_never_touched() {
    let harness = Harness::new();
    harness.object("young.zip", 2, vec![]);
    harness
        .objects
        .put_object(BUCKET, "undated.zip", 100, None, vec![]);

    let report = harness
        .collector(
            unconfirmed()
                .with_asset_type(AssetType::S3)
                .with_created_buffer_days(5),
        )
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert!(harness.objects.contains(BUCKET, "young.zip"));
    assert!(harness.objects.contains(BUCKET, "undated.zip"));
    let objects = report.objects.expect("object pass ran");
    assert_eq!(objects.total, 2);
    assert_eq!(objects.scanned, 0);
    assert!(harness.objects.stats().delete_batches.is_empty());
}

#[tokio::test]
async fn test_referenced_objects_survive() {
    let harness = Harness::new();
    harness.deploy(
        "App",
        r#"{"Resources":{"Fn":{"Properties":{"Code":{"S3Key":"live.zip"}}}}}"#,
    );
    harness.object("live.zip", 30, vec![]);
    harness.object("dead.zip", 30, vec![]);

    harness
        .collector(unconfirmed().with_asset_type(AssetType::S3))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert!(harness.objects.contains(BUCKET, "live.zip"));
    assert!(!harness.objects.contains(BUCKET, "dead.zip"));
}

#[tokio::test]
async fn test_objects_of_dead_stacks_are_collected() {
    let harness = Harness::new();
    harness
        .stacks
        .add_stack("Gone", StackStatus::DeleteComplete, r#"{"S3Key":"old.zip"}"#, None);
    harness.object("old.zip", 30, vec![]);

    harness
        .collector(unconfirmed().with_asset_type(AssetType::S3))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert!(!harness.objects.contains(BUCKET, "old.zip"));
}

#[tokio::test]
async fn test_grace_period_is_respected() {
    let harness = Harness::new();
    harness.object("recent.zip", 30, vec![object_isolation_tag(1)]);

    let report = harness
        .collector(
            unconfirmed()
                .with_asset_type(AssetType::S3)
                .with_rollback_buffer_days(3),
        )
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert!(harness.objects.contains(BUCKET, "recent.zip"));
    assert!(has_object_isolation(&harness, "recent.zip"));
    let objects = report.objects.expect("object pass ran");
    assert_eq!(objects.deleted, 0);
    assert_eq!(objects.tagged, 0);
    assert_eq!(harness.objects.stats().put_tag_calls, 0);
}

#[tokio::test]
async fn test_untag_keeps_other_tags_and_is_idempotent() {
    let harness = Harness::new();
    harness.deploy("App", r#"{"S3Key":"back.zip"}"#);
    harness.object(
        "back.zip",
        30,
        vec![Tag::new("owner", "team-a"), object_isolation_tag(1)],
    );
    let config = unconfirmed()
        .with_asset_type(AssetType::S3)
        .with_rollback_buffer_days(3);

    let first = harness
        .collector(config.clone())
        .garbage_collect(&environment())
        .await
        .expect("first gc");
    assert_eq!(first.objects.expect("object pass ran").untagged, 1);
    assert_eq!(
        harness.objects.object_tags(BUCKET, "back.zip"),
        Some(vec![Tag::new("owner", "team-a")])
    );

    let writes = harness.objects.stats().put_tag_calls;
    let second = harness
        .collector(config)
        .garbage_collect(&environment())
        .await
        .expect("second gc");
    assert_eq!(second.objects.expect("object pass ran").untagged, 0);
    assert_eq!(harness.objects.stats().put_tag_calls, writes);
    assert!(harness.objects.contains(BUCKET, "back.zip"));
}

#[tokio::test]
async fn test_object_deletes_respect_request_limit() {
    let harness = Harness::new();
    for i in 0..1500 {
        harness.object(&format!("{i:05}.zip"), 30, vec![]);
    }

    let report = harness
        .collector(unconfirmed().with_asset_type(AssetType::S3))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    let batches = harness.objects.stats().delete_batches;
    assert!(batches.iter().all(|&size| size <= 1000));
    assert_eq!(batches.iter().sum::<usize>(), 1500);
    assert_eq!(report.objects.expect("object pass ran").deleted, 1500);
    assert_eq!(harness.objects.object_count(BUCKET), 0);
}

#[tokio::test]
async fn test_per_key_delete_failure_is_counted() {
    let harness = Harness::new();
    harness.object("ok.zip", 30, vec![]);
    harness.object("denied.zip", 30, vec![]);
    harness.objects.fail_delete_for("denied.zip");

    let report = harness
        .collector(unconfirmed().with_asset_type(AssetType::S3))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    let objects = report.objects.expect("object pass ran");
    assert_eq!(objects.deleted, 1);
    assert_eq!(objects.failures, 1);
    assert!(harness.objects.contains(BUCKET, "denied.zip"));
}

// ============================================================================
// Image registry
// ============================================================================

#[tokio::test]
async fn test_referenced_image_loses_stale_isolation_tag() {
    let harness = Harness::new();
    harness.deploy("App", r#"{"Image":"123.dkr.ecr/cdk-assets-repo:abc123"}"#);
    let stale = image_isolation_tag(10);
    harness.image("sha256:live", &["abc123", &stale], 30);

    let report = harness
        .collector(
            unconfirmed()
                .with_asset_type(AssetType::Ecr)
                .with_rollback_buffer_days(3),
        )
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert!(harness.images.contains(REPOSITORY, "sha256:live"));
    assert_eq!(
        harness.images.image_tags(REPOSITORY, "sha256:live"),
        Some(vec!["abc123".to_string()])
    );
    assert_eq!(harness.images.stats().put_image_calls, 0);
    let images = report.images.expect("image pass ran");
    assert_eq!(images.untagged, 1);
    assert_eq!(images.deleted, 0);
    assert_eq!(images.tagged, 0);
}

#[tokio::test]
async fn test_unreferenced_image_is_isolated_then_kept() {
    let harness = Harness::new();
    harness.image("sha256:dead", &["def456"], 30);

    let report = harness
        .collector(
            unconfirmed()
                .with_asset_type(AssetType::Ecr)
                .with_rollback_buffer_days(3),
        )
        .garbage_collect(&environment())
        .await
        .expect("gc");

    let tags = harness
        .images
        .image_tags(REPOSITORY, "sha256:dead")
        .expect("image kept");
    assert!(tags.iter().any(|tag| tag.contains(IMAGE_ISOLATED_TAG)));
    assert!(tags.contains(&"def456".to_string()));
    assert_eq!(report.images.expect("image pass ran").tagged, 1);
}

#[tokio::test]
async fn test_image_deletes_respect_request_limit() {
    let harness = Harness::with_stores(
        InMemoryObjectStore::new(),
        InMemoryImageRegistry::new().with_page_size(30),
    );
    for i in 0..250 {
        harness.image(&format!("sha256:{i:04}"), &[&format!("tag{i:04}")], 30);
    }

    let report = harness
        .collector(unconfirmed().with_asset_type(AssetType::Ecr))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    let stats = harness.images.stats();
    assert!(stats.delete_batches.iter().all(|&size| size <= 100));
    assert!(stats.describe_batches.iter().all(|&size| size <= 100));
    assert_eq!(report.images.expect("image pass ran").deleted, 250);
    assert_eq!(harness.images.image_count(REPOSITORY), 0);
}

#[tokio::test]
async fn test_young_images_are_never_touched() {
    let harness = Harness::new();
    harness.image("sha256:young", &["fresh"], 0);

    harness
        .collector(unconfirmed().with_asset_type(AssetType::Ecr))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert!(harness.images.contains(REPOSITORY, "sha256:young"));
}

// ============================================================================
// Actions and confirmation
// ============================================================================

#[tokio::test]
async fn test_print_action_mutates_nothing() {
    let harness = Harness::new();
    harness.object("stale.zip", 30, vec![object_isolation_tag(10)]);
    harness.object("new.zip", 30, vec![]);
    harness.image("sha256:dead", &["def456"], 30);

    let report = harness
        .collector(
            unconfirmed()
                .with_action(Action::Print)
                .with_rollback_buffer_days(3),
        )
        .garbage_collect(&environment())
        .await
        .expect("gc");

    let stats = harness.objects.stats();
    assert_eq!(stats.put_tag_calls, 0);
    assert_eq!(stats.delete_tag_calls, 0);
    assert!(stats.delete_batches.is_empty());
    assert_eq!(harness.images.stats().put_image_calls, 0);
    assert!(harness.images.stats().delete_batches.is_empty());
    assert_eq!(harness.objects.object_count(BUCKET), 2);
    assert_eq!(report.total_deleted(), 0);
    assert_eq!(report.total_tagged(), 0);
}

#[tokio::test]
async fn test_tag_action_never_deletes() {
    let harness = Harness::new();
    harness.object("stale.zip", 30, vec![object_isolation_tag(10)]);
    harness.object("new.zip", 30, vec![]);

    harness
        .collector(
            unconfirmed()
                .with_asset_type(AssetType::S3)
                .with_action(Action::Tag)
                .with_rollback_buffer_days(3),
        )
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert!(harness.objects.contains(BUCKET, "stale.zip"));
    assert!(has_object_isolation(&harness, "new.zip"));
}

#[tokio::test]
async fn test_declined_confirmation_aborts_run() {
    let harness = Harness::new().answering(&["no"]);
    harness.object("dead.zip", 30, vec![]);
    harness.image("sha256:dead", &["def456"], 30);

    let result = harness
        .collector(GcConfig::default())
        .garbage_collect(&environment())
        .await;

    assert!(matches!(result, Err(Error::Aborted(_))));
    assert!(harness.objects.contains(BUCKET, "dead.zip"));
    assert!(harness.images.contains(REPOSITORY, "sha256:dead"));
    assert_eq!(harness.images.stats().list_calls, 0);

    let prompts = harness.confirmation.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("Found 1 assets to delete"));
    assert!(prompts[0].contains("isolated for > 0 days"));
    assert!(prompts[0].contains("created > 1 days ago"));
    assert!(!harness.progress.is_paused());
}

#[tokio::test]
async fn test_delete_all_prompts_once() {
    let harness = Harness::new().answering(&["delete-all"]);
    for key in ["a.zip", "b.zip", "c.zip", "d.zip"] {
        harness.object(key, 30, vec![]);
    }
    harness.image("sha256:dead", &["def456"], 30);

    let report = harness
        .collector(GcConfig::default().with_object_batch_size(2))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert_eq!(harness.confirmation.prompts().len(), 1);
    assert_eq!(report.total_deleted(), 5);
}

#[tokio::test]
async fn test_yes_prompts_every_batch() {
    let harness = Harness::new().answering(&["yes", "y"]);
    for key in ["a.zip", "b.zip", "c.zip", "d.zip"] {
        harness.object(key, 30, vec![]);
    }

    harness
        .collector(
            GcConfig::default()
                .with_asset_type(AssetType::S3)
                .with_object_batch_size(2),
        )
        .garbage_collect(&environment())
        .await
        .expect("gc");

    assert_eq!(harness.confirmation.prompts().len(), 2);
    assert_eq!(harness.objects.object_count(BUCKET), 0);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_missing_bootstrap_stack_touches_nothing() {
    let harness = Harness::new();
    harness.object("dead.zip", 30, vec![]);

    let result = harness
        .collector(unconfirmed().with_bootstrap_stack_name("OtherToolkit"))
        .garbage_collect(&environment())
        .await;

    assert!(matches!(result, Err(Error::BootstrapNotFound { .. })));
    assert_eq!(harness.objects.stats().list_calls, 0);
    assert_eq!(harness.stacks.list_calls(), 0);
}

#[tokio::test]
async fn test_initial_refresh_failure_touches_nothing() {
    let harness = Harness::new();
    harness.object("dead.zip", 30, vec![]);
    harness.stacks.fail();

    let result = harness
        .collector(unconfirmed())
        .garbage_collect(&environment())
        .await;

    assert!(matches!(result, Err(Error::RefreshFailed(_))));
    assert!(harness.objects.contains(BUCKET, "dead.zip"));
    assert_eq!(harness.objects.stats().list_calls, 0);
}

#[tokio::test]
async fn test_image_pass_runs_after_object_pass_fails() {
    let harness = Harness::new();
    harness.objects.fail_listing();
    harness.image("sha256:dead", &["def456"], 30);

    let result = harness
        .collector(unconfirmed())
        .garbage_collect(&environment())
        .await;

    assert!(matches!(result, Err(Error::OperationFailed { .. })));
    assert!(!harness.images.contains(REPOSITORY, "sha256:dead"));
}

#[tokio::test(start_paused = true)]
async fn test_stale_cache_fails_pass_without_deleting() {
    let harness = Harness::new();
    harness.object("dead.zip", 30, vec![]);
    let wedging = Arc::new(WedgingObjectStore {
        inner: harness.objects.clone(),
        stacks: harness.stacks.clone(),
    });

    let result = harness
        .collector_with_objects(unconfirmed().with_asset_type(AssetType::S3), wedging)
        .garbage_collect(&environment())
        .await;

    assert!(matches!(
        result,
        Err(Error::RefreshTimeout { max_age_ms: 600_000 })
    ));
    assert!(harness.objects.contains(BUCKET, "dead.zip"));
    assert!(harness.objects.stats().delete_batches.is_empty());
    assert!(harness.confirmation.prompts().is_empty());
}

#[tokio::test]
async fn test_environments_are_collected_in_order() {
    let harness = Harness::new();
    harness.object("dead.zip", 30, vec![]);
    let environments = [
        Environment::new("a", "111111111111", "us-east-1"),
        Environment::new("b", "222222222222", "eu-west-1"),
    ];

    let reports = harness
        .collector(unconfirmed().with_asset_type(AssetType::S3))
        .garbage_collect_environments(&environments)
        .await
        .expect("gc");

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].environment, "aws://111111111111/us-east-1");
    assert_eq!(reports[1].environment, "aws://222222222222/eu-west-1");
    assert_eq!(reports[0].total_deleted(), 1);
    assert_eq!(reports[1].total_deleted(), 0);
}

#[tokio::test]
async fn test_progress_tracks_scanned_assets() {
    let harness = Harness::new();
    harness.object("a.zip", 30, vec![]);
    harness.object("b.zip", 30, vec![]);

    harness
        .collector(unconfirmed().with_asset_type(AssetType::S3))
        .garbage_collect(&environment())
        .await
        .expect("gc");

    let snapshot = harness.progress.snapshot();
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.scanned, 2);
    assert_eq!(snapshot.deleted, 2);
}
