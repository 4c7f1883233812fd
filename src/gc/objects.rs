//! Object storage side of a collection pass.
//!
//! Reads the bootstrap bucket in batches and applies delete / tag / untag
//! decisions to it. Deletes use the batch API (up to 1000 keys per request);
//! tagging has no batch API, so tag calls fan out through the bulkhead.

use super::ActionOutcome;
use crate::models::{Asset, ObjectAsset};
use crate::storage::bulkhead::TaskBulkhead;
use crate::storage::traits::{OBJECT_DELETE_BATCH_LIMIT, ObjectStorageClient};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Counts every object in `bucket`.
///
/// # Errors
///
/// Returns an error if a listing call fails.
pub async fn count_objects(client: &dyn ObjectStorageClient, bucket: &str) -> Result<usize> {
    let mut total = 0;
    let mut token: Option<String> = None;
    loop {
        let page = client.list_objects(bucket, token.as_deref()).await?;
        total += page.objects.len();
        token = page.next_token;
        if token.is_none() {
            return Ok(total);
        }
    }
}

/// Reads a bucket in batches of old-enough objects.
///
/// Objects modified at or after `created_cutoff` are skipped. A missing
/// modification time counts as "now", so such objects are skipped too.
pub struct ObjectBatchReader<'a> {
    client: &'a dyn ObjectStorageClient,
    bucket: &'a str,
    batch_size: usize,
    created_cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    token: Option<String>,
    exhausted: bool,
    buffer: Vec<ObjectAsset>,
}

impl<'a> ObjectBatchReader<'a> {
    /// Creates a reader positioned at the start of `bucket`.
    #[must_use]
    pub fn new(
        client: &'a dyn ObjectStorageClient,
        bucket: &'a str,
        batch_size: usize,
        created_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client,
            bucket,
            batch_size: batch_size.max(1),
            created_cutoff,
            now,
            token: None,
            exhausted: false,
            buffer: Vec::new(),
        }
    }

    /// Returns the next batch, or `None` once the bucket is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing call fails.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ObjectAsset>>> {
        while self.buffer.len() < self.batch_size && !self.exhausted {
            let page = self
                .client
                .list_objects(self.bucket, self.token.as_deref())
                .await?;

            self.buffer.extend(
                page.objects
                    .into_iter()
                    .filter(|object| {
                        !object.key.is_empty()
                            && object.last_modified.unwrap_or(self.now) < self.created_cutoff
                    })
                    .map(|object| ObjectAsset::new(self.bucket, object.key, object.size)),
            );

            self.token = page.next_token;
            self.exhausted = self.token.is_none();
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = self.buffer.len().min(self.batch_size);
        Ok(Some(self.buffer.drain(..take).collect()))
    }
}

/// Loads the tag set of every object in `batch`.
///
/// # Errors
///
/// Returns the first tag read failure.
pub async fn load_all_tags(
    client: &dyn ObjectStorageClient,
    bulkhead: &TaskBulkhead,
    batch: &[ObjectAsset],
) -> Result<()> {
    let results = bulkhead
        .run_all(
            "get_object_tags",
            batch.iter().map(|object| async move {
                object.load_tags(client).await.map(|_| ())
            }),
        )
        .await;
    results.into_iter().collect()
}

/// Deletes `objects` in requests of at most 1000 keys.
///
/// # Errors
///
/// Returns an error if a delete request fails as a whole. Per-key failures
/// are logged and counted.
pub async fn delete_objects(
    client: &dyn ObjectStorageClient,
    bucket: &str,
    objects: &[ObjectAsset],
) -> Result<ActionOutcome> {
    let mut outcome = ActionOutcome::default();
    for chunk in objects.chunks(OBJECT_DELETE_BATCH_LIMIT) {
        let keys: Vec<String> = chunk.iter().map(|object| object.key.clone()).collect();
        let response = client.delete_objects(bucket, &keys, true).await?;

        let failed: HashSet<&str> = response
            .failures
            .iter()
            .map(|failure| {
                warn!(
                    bucket,
                    key = %failure.id,
                    error = %failure.message,
                    "Failed to delete object"
                );
                failure.id.as_str()
            })
            .collect();

        for object in chunk {
            if failed.contains(object.key.as_str()) {
                outcome.failures += 1;
            } else {
                outcome.record(object.size());
            }
        }
        debug!(bucket, requested = chunk.len(), failed = failed.len(), "Deleted object batch");
    }
    Ok(outcome)
}

/// Tags `objects` as isolated at `now`, keeping their other tags.
///
/// Failures are logged and skipped; those objects are tagged on a later pass.
pub async fn tag_objects(
    client: &dyn ObjectStorageClient,
    bulkhead: &TaskBulkhead,
    bucket: &str,
    objects: &[ObjectAsset],
    now: DateTime<Utc>,
) -> ActionOutcome {
    let value = ObjectAsset::build_isolation_value(now);
    let results = bulkhead
        .run_all(
            "put_object_tags",
            objects.iter().map(|object| {
                let tags = object.tags_with_isolation(&value);
                async move { client.put_object_tags(bucket, &object.key, &tags).await }
            }),
        )
        .await;

    let mut outcome = ActionOutcome::default();
    for (object, result) in objects.iter().zip(results) {
        match result {
            Ok(()) => outcome.record(object.size()),
            Err(e) => {
                warn!(bucket, key = %object.key, error = %e, "Unable to tag object");
                outcome.failures += 1;
            },
        }
    }
    outcome
}

/// Removes the isolation tag from `objects`, writing back their other tags.
///
/// Objects left without tags get their tag set deleted instead. Running this
/// on an object without an isolation tag leaves it unchanged.
pub async fn untag_objects(
    client: &dyn ObjectStorageClient,
    bulkhead: &TaskBulkhead,
    bucket: &str,
    objects: &[ObjectAsset],
) -> ActionOutcome {
    let results = bulkhead
        .run_all(
            "untag_object",
            objects.iter().map(|object| {
                let remaining = object.tags_without_isolation();
                async move {
                    if remaining.is_empty() {
                        client.delete_object_tags(bucket, &object.key).await
                    } else {
                        client.put_object_tags(bucket, &object.key, &remaining).await
                    }
                }
            }),
        )
        .await;

    let mut outcome = ActionOutcome::default();
    for (object, result) in objects.iter().zip(results) {
        match result {
            Ok(()) => outcome.record(object.size()),
            Err(e) => {
                warn!(bucket, key = %object.key, error = %e, "Unable to untag object");
                outcome.failures += 1;
            },
        }
    }
    outcome
}
