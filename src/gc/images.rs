//! Image registry side of a collection pass.
//!
//! Registries list one row per tag, so rows are grouped by digest before an
//! image becomes an [`ImageAsset`]. Describe, get and delete calls accept at
//! most 100 ids and are chunked accordingly.

use super::ActionOutcome;
use crate::models::{Asset, IMAGE_ISOLATED_TAG, ImageAsset};
use crate::storage::bulkhead::TaskBulkhead;
use crate::storage::traits::{IMAGE_BATCH_LIMIT, ImageId, ImageRegistryClient};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Source of isolation tag indices, unique within the process.
static TAG_INDEX: AtomicU64 = AtomicU64::new(0);

fn next_tag_index() -> u64 {
    TAG_INDEX.fetch_add(1, Ordering::Relaxed)
}

/// Counts every listing row (digest/tag pair) in `repository`.
///
/// # Errors
///
/// Returns an error if a listing call fails.
pub async fn count_images(client: &dyn ImageRegistryClient, repository: &str) -> Result<usize> {
    let mut total = 0;
    let mut token: Option<String> = None;
    loop {
        let page = client.list_images(repository, token.as_deref()).await?;
        total += page.image_ids.len();
        token = page.next_token;
        if token.is_none() {
            return Ok(total);
        }
    }
}

/// Reads a repository in batches of old-enough images.
///
/// Rows without a digest or a tag are skipped. Images pushed at or after
/// `created_cutoff`, or with no push time, are skipped. Each digest is
/// returned at most once even when its tags span listing pages.
pub struct ImageBatchReader<'a> {
    client: &'a dyn ImageRegistryClient,
    repository: &'a str,
    batch_size: usize,
    created_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    token: Option<String>,
    exhausted: bool,
    seen: HashSet<String>,
    buffer: Vec<ImageAsset>,
}

impl<'a> ImageBatchReader<'a> {
    /// Creates a reader positioned at the start of `repository`.
    #[must_use]
    pub fn new(
        client: &'a dyn ImageRegistryClient,
        repository: &'a str,
        batch_size: usize,
        created_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client,
            repository,
            batch_size: batch_size.max(1),
            created_cutoff,
            now,
            token: None,
            exhausted: false,
            seen: HashSet::new(),
            buffer: Vec::new(),
        }
    }

    /// Returns the next batch, or `None` once the repository is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing, describe or get call fails.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ImageAsset>>> {
        while self.buffer.len() < self.batch_size && !self.exhausted {
            let page = self
                .client
                .list_images(self.repository, self.token.as_deref())
                .await?;
            self.token = page.next_token;
            self.exhausted = self.token.is_none();

            // Digest order follows the listing; tags are grouped per digest.
            let mut digests: Vec<String> = Vec::new();
            let mut listed_tags: HashMap<String, Vec<String>> = HashMap::new();
            for id in page.image_ids {
                let (Some(digest), Some(tag)) = (id.digest, id.tag) else {
                    continue;
                };
                if self.seen.contains(&digest) {
                    continue;
                }
                let tags = listed_tags.entry(digest.clone()).or_insert_with(|| {
                    digests.push(digest.clone());
                    Vec::new()
                });
                tags.push(tag);
            }
            if digests.is_empty() {
                continue;
            }

            let images = self.load_images(&digests, &mut listed_tags).await?;
            self.seen.extend(digests);
            self.buffer.extend(images);
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = self.buffer.len().min(self.batch_size);
        Ok(Some(self.buffer.drain(..take).collect()))
    }

    async fn load_images(
        &self,
        digests: &[String],
        listed_tags: &mut HashMap<String, Vec<String>>,
    ) -> Result<Vec<ImageAsset>> {
        let mut details = HashMap::new();
        let mut manifests = HashMap::new();
        for chunk in digests.chunks(IMAGE_BATCH_LIMIT) {
            for detail in self.client.describe_images(self.repository, chunk).await? {
                details.insert(detail.digest.clone(), detail);
            }
            for image in self.client.batch_get_images(self.repository, chunk).await? {
                manifests.insert(image.digest, image.manifest);
            }
        }

        let mut images = Vec::new();
        for digest in digests {
            let Some(detail) = details.remove(digest) else {
                continue;
            };
            if detail.pushed_at.unwrap_or(self.now) >= self.created_cutoff {
                continue;
            }
            let tags = if detail.tags.is_empty() {
                listed_tags.remove(digest).unwrap_or_default()
            } else {
                detail.tags
            };
            images.push(ImageAsset::new(
                digest.clone(),
                detail.size.unwrap_or(0),
                tags,
                manifests.remove(digest).unwrap_or_default(),
            ));
        }
        Ok(images)
    }
}

/// Deletes `images` by digest in requests of at most 100 ids.
///
/// # Errors
///
/// Returns an error if a delete request fails as a whole. Per-image failures
/// are logged and counted.
pub async fn delete_images(
    client: &dyn ImageRegistryClient,
    repository: &str,
    images: &[ImageAsset],
) -> Result<ActionOutcome> {
    let mut outcome = ActionOutcome::default();
    for chunk in images.chunks(IMAGE_BATCH_LIMIT) {
        let ids: Vec<ImageId> = chunk
            .iter()
            .map(|image| ImageId::digest(image.digest.clone()))
            .collect();
        let response = client.batch_delete_images(repository, &ids).await?;

        let failed: HashSet<&str> = response.failures.iter().map(|f| f.id.as_str()).collect();
        for failure in &response.failures {
            warn!(
                repository,
                image = %failure.id,
                error = %failure.message,
                "Failed to delete image"
            );
        }
        for image in chunk {
            if failed.contains(image.digest.as_str()) {
                outcome.failures += 1;
            } else {
                outcome.record(image.size());
            }
        }
        debug!(repository, requested = chunk.len(), failed = failed.len(), "Deleted image batch");
    }
    Ok(outcome)
}

/// Publishes an isolation tag on each of `images`.
///
/// Every tag gets its own index so that images tagged in the same
/// millisecond never collide. Failures (typically a tag collision with a
/// concurrent run) are logged and skipped.
pub async fn tag_images(
    client: &dyn ImageRegistryClient,
    bulkhead: &TaskBulkhead,
    repository: &str,
    images: &[ImageAsset],
    now: DateTime<Utc>,
) -> ActionOutcome {
    let now_millis = now.timestamp_millis();
    let results = bulkhead
        .run_all(
            "put_image",
            images.iter().map(|image| {
                let tag = ImageAsset::build_isolation_tag(next_tag_index(), now_millis);
                async move {
                    client
                        .put_image(repository, &image.digest, &image.manifest, &tag)
                        .await
                        .map_err(|e| {
                            warn!(
                                repository,
                                digest = %image.digest,
                                tag = %tag,
                                error = %e,
                                "Unable to tag image"
                            );
                            e
                        })
                }
            }),
        )
        .await;

    let mut outcome = ActionOutcome::default();
    for (image, result) in images.iter().zip(results) {
        if result.is_ok() {
            outcome.record(image.size());
        } else {
            outcome.failures += 1;
        }
    }
    outcome
}

/// Removes isolation tags from `images`.
///
/// Removing the last tag of an image deletes it, so images whose only tags
/// are isolation tags are left alone.
pub async fn untag_images(
    client: &dyn ImageRegistryClient,
    repository: &str,
    images: &[ImageAsset],
) -> ActionOutcome {
    let mut outcome = ActionOutcome::default();
    let mut ids: Vec<(ImageId, &ImageAsset)> = Vec::new();
    for image in images {
        let (isolation, other): (Vec<&String>, Vec<&String>) = image
            .tags
            .iter()
            .partition(|tag| tag.contains(IMAGE_ISOLATED_TAG));
        if other.is_empty() {
            warn!(repository, digest = %image.digest, "Not untagging image without other tags");
            outcome.failures += 1;
            continue;
        }
        ids.extend(isolation.into_iter().map(|tag| (ImageId::tag(tag.clone()), image)));
    }

    let mut untagged: HashSet<&str> = HashSet::new();
    let mut failed: HashSet<&str> = HashSet::new();
    for chunk in ids.chunks(IMAGE_BATCH_LIMIT) {
        let request: Vec<ImageId> = chunk.iter().map(|(id, _)| id.clone()).collect();
        match client.batch_delete_images(repository, &request).await {
            Ok(response) => {
                let rejected: HashSet<String> =
                    response.failures.iter().map(|f| f.id.clone()).collect();
                for (id, image) in chunk {
                    if rejected.contains(&id.to_string()) {
                        warn!(
                            repository,
                            digest = %image.digest,
                            tag = %id,
                            "Unable to untag image"
                        );
                        failed.insert(image.digest.as_str());
                    } else {
                        untagged.insert(image.digest.as_str());
                    }
                }
            },
            Err(e) => {
                warn!(repository, error = %e, "Untag request failed");
                failed.extend(chunk.iter().map(|(_, image)| image.digest.as_str()));
            },
        }
    }

    for image in images {
        let digest = image.digest.as_str();
        if failed.contains(digest) {
            outcome.failures += 1;
        } else if untagged.contains(digest) {
            outcome.record(image.size());
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryImageRegistry;
    use chrono::Duration;

    fn add_image(registry: &InMemoryImageRegistry, digest: &str, tags: &[&str]) {
        registry.put_image_record(
            "repo",
            digest,
            tags.iter().map(ToString::to_string).collect(),
            100,
            Some(Utc::now() - Duration::days(30)),
        );
    }

    #[tokio::test]
    async fn test_reader_groups_tags_by_digest() {
        let registry = InMemoryImageRegistry::new().with_page_size(2);
        add_image(&registry, "sha256:a", &["one", "two", "three"]);
        add_image(&registry, "sha256:b", &["four"]);
        let now = Utc::now();
        let mut reader = ImageBatchReader::new(&registry, "repo", 10, now - Duration::days(1), now);

        let batch = reader.next_batch().await.expect("batch").expect("some");
        assert_eq!(batch.len(), 2);
        let a = batch.iter().find(|i| i.digest == "sha256:a").expect("a");
        assert_eq!(a.tags.len(), 3);
        assert!(!a.manifest.is_empty());
        assert!(reader.next_batch().await.expect("batch").is_none());
    }

    #[tokio::test]
    async fn test_reader_skips_untagged_and_young() {
        let registry = InMemoryImageRegistry::new();
        let month_ago = Utc::now() - Duration::days(30);
        registry.put_image_record("repo", "sha256:untagged", vec![], 1, Some(month_ago));
        registry.put_image_record(
            "repo",
            "sha256:young",
            vec!["y".to_string()],
            1,
            Some(Utc::now()),
        );
        registry.put_image_record("repo", "sha256:undated", vec!["u".to_string()], 1, None);
        let now = Utc::now();
        let mut reader = ImageBatchReader::new(&registry, "repo", 10, now - Duration::days(1), now);

        assert!(reader.next_batch().await.expect("batch").is_none());
    }

    #[tokio::test]
    async fn test_count_images_counts_rows() {
        let registry = InMemoryImageRegistry::new().with_page_size(2);
        add_image(&registry, "sha256:a", &["one", "two"]);
        add_image(&registry, "sha256:b", &["three"]);
        assert_eq!(count_images(&registry, "repo").await.expect("count"), 3);
    }

    #[tokio::test]
    async fn test_tag_indices_are_unique() {
        let registry = InMemoryImageRegistry::new();
        add_image(&registry, "sha256:a", &["one"]);
        add_image(&registry, "sha256:b", &["two"]);
        let bulkhead =
            TaskBulkhead::new(crate::storage::bulkhead::BulkheadConfig::default(), "ecr");
        let images = vec![
            ImageAsset::new("sha256:a", 100, vec!["one".to_string()], "{}"),
            ImageAsset::new("sha256:b", 100, vec!["two".to_string()], "{}"),
        ];

        let outcome = tag_images(&registry, &bulkhead, "repo", &images, Utc::now()).await;
        assert_eq!(outcome.count, 2);

        let tag_a = registry.image_tags("repo", "sha256:a").expect("a");
        let tag_b = registry.image_tags("repo", "sha256:b").expect("b");
        let iso_a = tag_a.iter().find(|t| t.contains(IMAGE_ISOLATED_TAG)).expect("tagged");
        let iso_b = tag_b.iter().find(|t| t.contains(IMAGE_ISOLATED_TAG)).expect("tagged");
        assert_ne!(iso_a, iso_b);
    }

    #[tokio::test]
    async fn test_untag_keeps_image() {
        let registry = InMemoryImageRegistry::new();
        add_image(&registry, "sha256:a", &["live", "0-aws-cdk.isolated-1"]);
        let images = vec![ImageAsset::new(
            "sha256:a",
            100,
            vec!["live".to_string(), "0-aws-cdk.isolated-1".to_string()],
            "{}",
        )];

        let outcome = untag_images(&registry, "repo", &images).await;
        assert_eq!(outcome.count, 1);
        assert_eq!(registry.image_tags("repo", "sha256:a"), Some(vec!["live".to_string()]));

        // A second run has nothing left to remove.
        let images = vec![ImageAsset::new("sha256:a", 100, vec!["live".to_string()], "{}")];
        let outcome = untag_images(&registry, "repo", &images).await;
        assert_eq!(outcome.count, 0);
        assert!(registry.contains("repo", "sha256:a"));
    }
}
