//! Object storage client trait.

use crate::Result;
use crate::models::Tag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, if reported.
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of an object listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects on this page.
    pub objects: Vec<ObjectSummary>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

/// A single item a batch delete could not remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Key or image id that failed.
    pub id: String,
    /// Provider message.
    pub message: String,
}

/// Result of a batch delete that succeeded as a request.
///
/// Individual items may still have failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Items the provider reported as not deleted.
    pub failures: Vec<DeleteFailure>,
}

/// Client for the bucket holding file assets.
///
/// Implementations wrap a provider SDK. `delete_objects` accepts at most
/// [`super::OBJECT_DELETE_BATCH_LIMIT`] keys per call.
#[async_trait]
pub trait ObjectStorageClient: Send + Sync {
    /// Lists one page of objects.
    async fn list_objects(&self, bucket: &str, continuation: Option<&str>) -> Result<ObjectPage>;

    /// Reads the full tag set of an object.
    async fn get_object_tags(&self, bucket: &str, key: &str) -> Result<Vec<Tag>>;

    /// Replaces the tag set of an object.
    async fn put_object_tags(&self, bucket: &str, key: &str, tags: &[Tag]) -> Result<()>;

    /// Removes every tag of an object.
    async fn delete_object_tags(&self, bucket: &str, key: &str) -> Result<()>;

    /// Deletes a batch of objects.
    ///
    /// In quiet mode only failures are reported back.
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
        quiet: bool,
    ) -> Result<DeleteOutcome>;
}
