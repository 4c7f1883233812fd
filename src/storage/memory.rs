//! In-memory collaborators for testing.
//!
//! Non-persistent implementations of every collaborator trait. They behave
//! like the real providers where the collector depends on it:
//!
//! - batch calls reject more ids than the provider allows
//! - image listings return one row per tag
//! - deleting the last tag of an image deletes the image
//!
//! They also record call statistics and can inject failures, so tests can
//! assert on batch sizes and error paths.
//!
//! # Example
//!
//! ```rust,ignore
//! use assetgc::storage::memory::InMemoryObjectStore;
//!
//! let store = InMemoryObjectStore::new();
//! store.put_object("bucket", "abc.zip", 10, Some(ten_days_ago), vec![]);
//! ```

// Locks are never held across an await point.
#![allow(clippy::significant_drop_tightening)]

use super::traits::{
    BootstrapLookup, DeleteFailure, DeleteOutcome, IMAGE_BATCH_LIMIT, ImageDetail, ImageId,
    ImageIdPage, ImageManifest, ImageRegistryClient, OBJECT_DELETE_BATCH_LIMIT, ObjectPage,
    ObjectStorageClient, ObjectSummary, StackClient,
};
use crate::models::{
    BootstrapInfo, Environment, StackPage, StackStatus, StackSummary, Tag, TemplateParameter,
    TemplateSummary,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ============================================================================
// Object storage
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    size: u64,
    last_modified: Option<DateTime<Utc>>,
    tags: Vec<Tag>,
}

/// Call statistics of an [`InMemoryObjectStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreStats {
    /// Number of list calls.
    pub list_calls: usize,
    /// Number of tag-set reads.
    pub get_tag_calls: usize,
    /// Number of tag-set writes.
    pub put_tag_calls: usize,
    /// Number of tag-set removals.
    pub delete_tag_calls: usize,
    /// Size of every delete batch, in call order.
    pub delete_batches: Vec<usize>,
}

/// In-memory object storage.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    page_size: usize,
    stats: Mutex<ObjectStoreStats>,
    fail_delete: Mutex<HashSet<String>>,
    fail_tagging: Mutex<HashSet<String>>,
    fail_listing: AtomicBool,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Creates an empty store returning pages of up to 1000 objects.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            page_size: 1000,
            stats: Mutex::new(ObjectStoreStats::default()),
            fail_delete: Mutex::new(HashSet::new()),
            fail_tagging: Mutex::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
        }
    }

    /// Sets the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stores an object, replacing any existing one with the same key.
    pub fn put_object(
        &self,
        bucket: &str,
        key: &str,
        size: u64,
        last_modified: Option<DateTime<Utc>>,
        tags: Vec<Tag>,
    ) {
        lock(&self.buckets).entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                size,
                last_modified,
                tags,
            },
        );
    }

    /// Returns `true` if the object exists.
    #[must_use]
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        lock(&self.buckets)
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key))
    }

    /// Returns the tag set of an object.
    #[must_use]
    pub fn object_tags(&self, bucket: &str, key: &str) -> Option<Vec<Tag>> {
        lock(&self.buckets)
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.tags.clone())
    }

    /// Returns the number of objects in a bucket.
    #[must_use]
    pub fn object_count(&self, bucket: &str) -> usize {
        lock(&self.buckets).get(bucket).map_or(0, BTreeMap::len)
    }

    /// Returns a snapshot of the call statistics.
    #[must_use]
    pub fn stats(&self) -> ObjectStoreStats {
        lock(&self.stats).clone()
    }

    /// Makes batch deletes report `key` as a per-item failure.
    pub fn fail_delete_for(&self, key: &str) {
        lock(&self.fail_delete).insert(key.to_string());
    }

    /// Makes tag writes for `key` fail.
    pub fn fail_tagging_for(&self, key: &str) {
        lock(&self.fail_tagging).insert(key.to_string());
    }

    /// Makes every listing call fail.
    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    fn with_object<T>(
        &self,
        bucket: &str,
        key: &str,
        f: impl FnOnce(&mut StoredObject) -> T,
    ) -> Result<T> {
        let mut buckets = lock(&self.buckets);
        let object = buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
            .ok_or_else(|| Error::operation("object_tagging", format!("NoSuchKey: {key}")))?;
        Ok(f(object))
    }
}

#[async_trait]
impl ObjectStorageClient for InMemoryObjectStore {
    async fn list_objects(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage> {
        lock(&self.stats).list_calls += 1;
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::operation("list_objects", "injected listing failure"));
        }

        let buckets = lock(&self.buckets);
        let Some(objects) = buckets.get(bucket) else {
            return Err(Error::operation("list_objects", format!("NoSuchBucket: {bucket}")));
        };

        let lower = continuation.map_or(Bound::Unbounded, |token| {
            Bound::Excluded(token.to_string())
        });
        let mut page: Vec<ObjectSummary> = objects
            .range((lower, Bound::Unbounded))
            .take(self.page_size + 1)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.size,
                last_modified: object.last_modified,
            })
            .collect();

        let next_token = if page.len() > self.page_size {
            page.truncate(self.page_size);
            page.last().map(|summary| summary.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<Tag>> {
        lock(&self.stats).get_tag_calls += 1;
        self.with_object(bucket, key, |object| object.tags.clone())
    }

    async fn put_object_tags(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<()> {
        lock(&self.stats).put_tag_calls += 1;
        if lock(&self.fail_tagging).contains(key) {
            return Err(Error::operation("put_object_tags", format!("injected failure for {key}")));
        }
        self.with_object(bucket, key, |object| object.tags = tags.to_vec())
    }

    async fn delete_object_tags(&self, bucket: &str, key: &str) -> Result<()> {
        lock(&self.stats).delete_tag_calls += 1;
        if lock(&self.fail_tagging).contains(key) {
            return Err(Error::operation(
                "delete_object_tags",
                format!("injected failure for {key}"),
            ));
        }
        self.with_object(bucket, key, |object| object.tags.clear())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
        _quiet: bool,
    ) -> Result<DeleteOutcome> {
        lock(&self.stats).delete_batches.push(keys.len());
        if keys.len() > OBJECT_DELETE_BATCH_LIMIT {
            return Err(Error::operation(
                "delete_objects",
                format!(
                    "MalformedXML: {} keys exceeds the limit of {OBJECT_DELETE_BATCH_LIMIT}",
                    keys.len()
                ),
            ));
        }

        let failing = lock(&self.fail_delete).clone();
        let mut buckets = lock(&self.buckets);
        let objects = buckets.entry(bucket.to_string()).or_default();
        let mut outcome = DeleteOutcome::default();
        for key in keys {
            if failing.contains(key) {
                outcome.failures.push(DeleteFailure {
                    id: key.clone(),
                    message: "AccessDenied".to_string(),
                });
                continue;
            }
            // Deleting a missing key succeeds, as with the real API.
            objects.remove(key);
        }
        Ok(outcome)
    }
}

// ============================================================================
// Image registry
// ============================================================================

#[derive(Debug, Clone)]
struct StoredImage {
    tags: Vec<String>,
    size: u64,
    pushed_at: Option<DateTime<Utc>>,
    manifest: String,
}

/// Call statistics of an [`InMemoryImageRegistry`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRegistryStats {
    /// Number of list calls.
    pub list_calls: usize,
    /// Number of successful and failed put-image calls.
    pub put_image_calls: usize,
    /// Size of every batch-delete call, in call order.
    pub delete_batches: Vec<usize>,
    /// Size of every describe call, in call order.
    pub describe_batches: Vec<usize>,
}

/// In-memory image registry.
#[derive(Debug)]
pub struct InMemoryImageRegistry {
    repositories: Mutex<HashMap<String, BTreeMap<String, StoredImage>>>,
    page_size: usize,
    stats: Mutex<ImageRegistryStats>,
    fail_put: Mutex<HashSet<String>>,
}

impl Default for InMemoryImageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryImageRegistry {
    /// Creates an empty registry returning pages of up to 100 ids.
    #[must_use]
    pub fn new() -> Self {
        Self {
            repositories: Mutex::new(HashMap::new()),
            page_size: 100,
            stats: Mutex::new(ImageRegistryStats::default()),
            fail_put: Mutex::new(HashSet::new()),
        }
    }

    /// Sets the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stores an image, replacing any existing one with the same digest.
    pub fn put_image_record(
        &self,
        repository: &str,
        digest: &str,
        tags: Vec<String>,
        size: u64,
        pushed_at: Option<DateTime<Utc>>,
    ) {
        lock(&self.repositories)
            .entry(repository.to_string())
            .or_default()
            .insert(
                digest.to_string(),
                StoredImage {
                    tags,
                    size,
                    pushed_at,
                    manifest: format!("{{\"digest\":\"{digest}\"}}"),
                },
            );
    }

    /// Returns `true` if the digest exists.
    #[must_use]
    pub fn contains(&self, repository: &str, digest: &str) -> bool {
        lock(&self.repositories)
            .get(repository)
            .is_some_and(|images| images.contains_key(digest))
    }

    /// Returns the tags on a digest.
    #[must_use]
    pub fn image_tags(&self, repository: &str, digest: &str) -> Option<Vec<String>> {
        lock(&self.repositories)
            .get(repository)
            .and_then(|images| images.get(digest))
            .map(|image| image.tags.clone())
    }

    /// Returns the number of digests in a repository.
    #[must_use]
    pub fn image_count(&self, repository: &str) -> usize {
        lock(&self.repositories)
            .get(repository)
            .map_or(0, BTreeMap::len)
    }

    /// Returns a snapshot of the call statistics.
    #[must_use]
    pub fn stats(&self) -> ImageRegistryStats {
        lock(&self.stats).clone()
    }

    /// Makes put-image calls for `digest` fail, as on a tag collision.
    pub fn fail_put_for(&self, digest: &str) {
        lock(&self.fail_put).insert(digest.to_string());
    }

    fn check_batch(operation: &str, len: usize) -> Result<()> {
        if len > IMAGE_BATCH_LIMIT {
            return Err(Error::operation(
                operation,
                format!(
                    "InvalidParameterException: {len} ids exceeds the limit of {IMAGE_BATCH_LIMIT}"
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageRegistryClient for InMemoryImageRegistry {
    async fn list_images(
        &self,
        repository: &str,
        next_token: Option<&str>,
    ) -> Result<ImageIdPage> {
        lock(&self.stats).list_calls += 1;
        let repositories = lock(&self.repositories);
        let Some(images) = repositories.get(repository) else {
            return Err(Error::operation(
                "list_images",
                format!("RepositoryNotFoundException: {repository}"),
            ));
        };

        // One row per tag; untagged digests get a single tagless row.
        let rows: Vec<ImageId> = images
            .iter()
            .flat_map(|(digest, image)| {
                if image.tags.is_empty() {
                    vec![ImageId::digest(digest.clone())]
                } else {
                    image
                        .tags
                        .iter()
                        .map(|tag| ImageId::tagged(digest.clone(), tag.clone()))
                        .collect()
                }
            })
            .collect();

        let start = next_token
            .and_then(|token| rows.iter().position(|row| row.to_string() == token))
            .map_or(0, |index| index + 1);
        let page: Vec<ImageId> = rows.iter().skip(start).take(self.page_size).cloned().collect();
        let next_token = if start + page.len() < rows.len() {
            page.last().map(ToString::to_string)
        } else {
            None
        };

        Ok(ImageIdPage {
            image_ids: page,
            next_token,
        })
    }

    async fn describe_images(
        &self,
        repository: &str,
        digests: &[String],
    ) -> Result<Vec<ImageDetail>> {
        lock(&self.stats).describe_batches.push(digests.len());
        Self::check_batch("describe_images", digests.len())?;
        let repositories = lock(&self.repositories);
        let images = repositories.get(repository);
        Ok(digests
            .iter()
            .filter_map(|digest| {
                images.and_then(|images| images.get(digest)).map(|image| ImageDetail {
                    digest: digest.clone(),
                    tags: image.tags.clone(),
                    size: Some(image.size),
                    pushed_at: image.pushed_at,
                })
            })
            .collect())
    }

    async fn batch_get_images(
        &self,
        repository: &str,
        digests: &[String],
    ) -> Result<Vec<ImageManifest>> {
        Self::check_batch("batch_get_image", digests.len())?;
        let repositories = lock(&self.repositories);
        let images = repositories.get(repository);
        Ok(digests
            .iter()
            .filter_map(|digest| {
                images.and_then(|images| images.get(digest)).map(|image| ImageManifest {
                    digest: digest.clone(),
                    manifest: image.manifest.clone(),
                })
            })
            .collect())
    }

    async fn put_image(
        &self,
        repository: &str,
        digest: &str,
        _manifest: &str,
        tag: &str,
    ) -> Result<()> {
        lock(&self.stats).put_image_calls += 1;
        if lock(&self.fail_put).contains(digest) {
            return Err(Error::operation(
                "put_image",
                format!("ImageTagAlreadyExistsException: {tag}"),
            ));
        }

        let mut repositories = lock(&self.repositories);
        let images = repositories.entry(repository.to_string()).or_default();
        if images.get(digest).is_some_and(|image| image.tags.iter().any(|t| t == tag)) {
            return Err(Error::operation(
                "put_image",
                format!("ImageAlreadyExistsException: {digest}:{tag}"),
            ));
        }
        // A tag points at exactly one digest; publishing it moves it.
        for image in images.values_mut() {
            image.tags.retain(|t| t != tag);
        }
        let image = images
            .get_mut(digest)
            .ok_or_else(|| {
                Error::operation("put_image", format!("ImageNotFoundException: {digest}"))
            })?;
        image.tags.push(tag.to_string());
        Ok(())
    }

    async fn batch_delete_images(
        &self,
        repository: &str,
        ids: &[ImageId],
    ) -> Result<DeleteOutcome> {
        lock(&self.stats).delete_batches.push(ids.len());
        Self::check_batch("batch_delete_image", ids.len())?;

        let mut repositories = lock(&self.repositories);
        let images = repositories.entry(repository.to_string()).or_default();
        let mut outcome = DeleteOutcome::default();
        for id in ids {
            let removed = match (&id.digest, &id.tag) {
                (Some(digest), _) => images.remove(digest).is_some(),
                (None, Some(tag)) => {
                    let owner = images
                        .iter_mut()
                        .find(|(_, image)| image.tags.iter().any(|t| t == tag));
                    match owner {
                        Some((digest, image)) => {
                            image.tags.retain(|t| t != tag);
                            let now_untagged = image.tags.is_empty().then(|| digest.clone());
                            if let Some(digest) = now_untagged {
                                images.remove(&digest);
                            }
                            true
                        },
                        None => false,
                    }
                },
                (None, None) => false,
            };
            if !removed {
                outcome.failures.push(DeleteFailure {
                    id: id.to_string(),
                    message: "ImageNotFound".to_string(),
                });
            }
        }
        Ok(outcome)
    }
}

// ============================================================================
// Control plane
// ============================================================================

#[derive(Debug, Clone)]
struct StoredStack {
    summary: StackSummary,
    template: String,
    parameters: Option<Vec<TemplateParameter>>,
}

/// In-memory control plane.
#[derive(Debug)]
pub struct InMemoryStackClient {
    stacks: Mutex<Vec<StoredStack>>,
    page_size: usize,
    stalled: AtomicBool,
    failing: AtomicBool,
    list_calls: AtomicUsize,
}

impl Default for InMemoryStackClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStackClient {
    /// Creates a control plane without stacks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stacks: Mutex::new(Vec::new()),
            page_size: 100,
            stalled: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Sets the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Adds a deployed stack.
    pub fn add_stack(
        &self,
        name: &str,
        status: StackStatus,
        template: &str,
        parameters: Option<Vec<TemplateParameter>>,
    ) {
        lock(&self.stacks).push(StoredStack {
            summary: StackSummary::new(name, status).with_stack_id(format!("arn:stack/{name}")),
            template: template.to_string(),
            parameters,
        });
    }

    /// Removes a stack.
    pub fn remove_stack(&self, name: &str) {
        lock(&self.stacks).retain(|stack| stack.summary.stack_name != name);
    }

    /// Makes every listing call hang forever.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Makes every listing call fail.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Number of listing calls so far.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn find(&self, stack: &str) -> Result<StoredStack> {
        lock(&self.stacks)
            .iter()
            .find(|s| s.summary.reference() == stack || s.summary.stack_name == stack)
            .cloned()
            .ok_or_else(|| {
                Error::operation("describe_stack", format!("Stack {stack} does not exist"))
            })
    }
}

#[async_trait]
impl StackClient for InMemoryStackClient {
    async fn list_stacks(&self, next_token: Option<&str>) -> Result<StackPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::operation("list_stacks", "injected control-plane failure"));
        }

        let stacks = lock(&self.stacks);
        let start = next_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let page: Vec<StackSummary> = stacks
            .iter()
            .skip(start)
            .take(self.page_size)
            .map(|stack| stack.summary.clone())
            .collect();
        let end = start + page.len();
        let next_token = (end < stacks.len()).then(|| end.to_string());
        Ok(StackPage {
            stacks: page,
            next_token,
        })
    }

    async fn get_template_summary(&self, stack: &str) -> Result<TemplateSummary> {
        Ok(TemplateSummary {
            parameters: self.find(stack)?.parameters,
        })
    }

    async fn get_template(&self, stack: &str) -> Result<String> {
        Ok(self.find(stack)?.template)
    }
}

// ============================================================================
// Bootstrap lookup
// ============================================================================

/// Bootstrap lookup backed by a fixed table.
#[derive(Debug, Default)]
pub struct StaticBootstrapLookup {
    stacks: HashMap<String, BootstrapInfo>,
}

impl StaticBootstrapLookup {
    /// Creates an empty lookup table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bootstrap stack.
    #[must_use]
    pub fn with_stack(mut self, stack_name: &str, info: BootstrapInfo) -> Self {
        self.stacks.insert(stack_name.to_string(), info);
        self
    }
}

#[async_trait]
impl BootstrapLookup for StaticBootstrapLookup {
    async fn lookup(&self, environment: &Environment, stack_name: &str) -> Result<BootstrapInfo> {
        self.stacks
            .get(stack_name)
            .cloned()
            .ok_or_else(|| Error::BootstrapNotFound {
                stack_name: stack_name.to_string(),
                environment: environment.to_string(),
            })
    }
}
