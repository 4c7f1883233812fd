//! Image registry client trait.

use super::object::DeleteOutcome;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Identifies an image by digest, by tag, or both.
///
/// Listings return one row per tag, so a digest with three tags shows up
/// three times.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId {
    /// Content digest.
    pub digest: Option<String>,
    /// Tag.
    pub tag: Option<String>,
}

impl ImageId {
    /// An id addressing an image by digest.
    #[must_use]
    pub fn digest(digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            tag: None,
        }
    }

    /// An id addressing a single tag.
    #[must_use]
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            digest: None,
            tag: Some(tag.into()),
        }
    }

    /// A listing row: digest plus one of its tags.
    #[must_use]
    pub fn tagged(digest: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            tag: Some(tag.into()),
        }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.digest, &self.tag) {
            (Some(digest), Some(tag)) => write!(f, "{digest}:{tag}"),
            (Some(digest), None) => f.write_str(digest),
            (None, Some(tag)) => f.write_str(tag),
            (None, None) => f.write_str("<empty>"),
        }
    }
}

/// One page of an image listing.
#[derive(Debug, Clone, Default)]
pub struct ImageIdPage {
    /// Image ids on this page.
    pub image_ids: Vec<ImageId>,
    /// Continuation token; `None` on the last page.
    pub next_token: Option<String>,
}

/// Description of one image digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetail {
    /// Content digest.
    pub digest: String,
    /// All tags on the digest.
    pub tags: Vec<String>,
    /// Size in bytes, if reported.
    pub size: Option<u64>,
    /// Push time, if reported.
    pub pushed_at: Option<DateTime<Utc>>,
}

/// Manifest of one image digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifest {
    /// Content digest.
    pub digest: String,
    /// Raw manifest document.
    pub manifest: String,
}

/// Client for the repository holding image assets.
///
/// `describe_images`, `batch_get_images` and `batch_delete_images` accept at
/// most [`super::IMAGE_BATCH_LIMIT`] ids per call.
#[async_trait]
pub trait ImageRegistryClient: Send + Sync {
    /// Lists one page of image ids.
    async fn list_images(&self, repository: &str, next_token: Option<&str>)
    -> Result<ImageIdPage>;

    /// Describes images by digest.
    async fn describe_images(
        &self,
        repository: &str,
        digests: &[String],
    ) -> Result<Vec<ImageDetail>>;

    /// Fetches image manifests by digest.
    async fn batch_get_images(
        &self,
        repository: &str,
        digests: &[String],
    ) -> Result<Vec<ImageManifest>>;

    /// Publishes `tag` for the image `digest` by re-putting its manifest.
    async fn put_image(
        &self,
        repository: &str,
        digest: &str,
        manifest: &str,
        tag: &str,
    ) -> Result<()>;

    /// Deletes images by digest, or single tags by tag.
    async fn batch_delete_images(
        &self,
        repository: &str,
        ids: &[ImageId],
    ) -> Result<DeleteOutcome>;
}
