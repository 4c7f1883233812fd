//! Asset value objects.
//!
//! Two kinds of assets live in a bootstrapped environment:
//!
//! - [`ObjectAsset`]: a file asset in the bootstrap bucket. Tags are real
//!   key/value pairs, fetched lazily and at most once per asset instance.
//! - [`ImageAsset`]: a container image in the bootstrap repository, identified
//!   by digest. Images cannot carry key/value tags, so the isolation date is
//!   embedded positionally in a tag string.

use crate::storage::traits::ObjectStorageClient;
use crate::Result;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

/// Tag key marking an object as isolated.
pub const OBJECT_ISOLATED_TAG: &str = "aws-cdk:isolated";

/// Marker embedded in image tags that record isolation.
///
/// `:` is not valid in image tags, hence the different spelling.
pub const IMAGE_ISOLATED_TAG: &str = "aws-cdk.isolated";

/// A key/value tag attached to a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a new tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Queries shared by both asset kinds.
pub trait Asset {
    /// Identifier used in logs (object key or image digest).
    fn identifier(&self) -> &str;

    /// Size of the asset in bytes.
    fn size(&self) -> u64;

    /// Returns `true` if the asset carries an isolation tag.
    fn has_isolation_tag(&self) -> bool;

    /// Returns when the asset was first observed isolated, if known.
    fn isolation_date(&self) -> Option<DateTime<Utc>>;

    /// Returns `true` if the isolation tag exists and is strictly older than `cutoff`.
    ///
    /// A missing or unparsable tag is never "older".
    fn isolation_tag_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.isolation_date().is_some_and(|date| date < cutoff)
    }
}

// ============================================================================
// Image assets
// ============================================================================

/// An image asset in the bootstrap repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    /// Content digest (`sha256:...`).
    pub digest: String,
    /// Image size in bytes.
    pub size: u64,
    /// Tags pointing at this digest.
    pub tags: Vec<String>,
    /// Image manifest, needed to publish an additional tag.
    pub manifest: String,
}

impl ImageAsset {
    /// Creates a new image asset.
    #[must_use]
    pub fn new(
        digest: impl Into<String>,
        size: u64,
        tags: Vec<String>,
        manifest: impl Into<String>,
    ) -> Self {
        Self {
            digest: digest.into(),
            size,
            tags,
            manifest: manifest.into(),
        }
    }

    /// Returns the first tag containing `marker`.
    #[must_use]
    pub fn find_tag(&self, marker: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.contains(marker))
            .map(String::as_str)
    }

    /// Returns the isolation tag, if present.
    #[must_use]
    pub fn isolation_tag(&self) -> Option<&str> {
        self.find_tag(IMAGE_ISOLATED_TAG)
    }

    /// Builds an isolation tag: `<index>-aws-cdk.isolated-<millis>`.
    ///
    /// The index keeps tags unique when many images of one batch are tagged
    /// within the same millisecond.
    #[must_use]
    pub fn build_isolation_tag(index: u64, now_millis: i64) -> String {
        format!("{index}-{IMAGE_ISOLATED_TAG}-{now_millis}")
    }

    /// Extracts the isolation timestamp from a tag built by
    /// [`Self::build_isolation_tag`].
    ///
    /// The marker itself contains a `-`, so the timestamp is the 4th field.
    #[must_use]
    pub fn parse_isolation_tag(tag: &str) -> Option<DateTime<Utc>> {
        let millis = tag.split('-').nth(3)?.parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl Asset for ImageAsset {
    fn identifier(&self) -> &str {
        &self.digest
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn has_isolation_tag(&self) -> bool {
        self.isolation_tag().is_some()
    }

    fn isolation_date(&self) -> Option<DateTime<Utc>> {
        self.isolation_tag().and_then(Self::parse_isolation_tag)
    }
}

// ============================================================================
// Object assets
// ============================================================================

/// A file asset in the bootstrap bucket.
///
/// The tag set is fetched on first use and cached for the lifetime of this
/// instance, which is one batch of one pass.
#[derive(Debug, Clone)]
pub struct ObjectAsset {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    tags: OnceCell<Vec<Tag>>,
}

impl ObjectAsset {
    /// Creates a new object asset with an unfetched tag set.
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
            tags: OnceCell::new(),
        }
    }

    /// Creates an object asset whose tag set is already known.
    #[must_use]
    pub fn with_tags(
        bucket: impl Into<String>,
        key: impl Into<String>,
        size: u64,
        tags: Vec<Tag>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
            tags: OnceCell::new_with(Some(tags)),
        }
    }

    /// The asset hash: the key up to its first `.`.
    ///
    /// Templates reference `<hash>.zip` / `<hash>.json`, so only the hash is
    /// searched for.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.key.split('.').next().unwrap_or(&self.key)
    }

    /// Returns the tag set, fetching it on first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag set cannot be fetched.
    pub async fn load_tags(&self, client: &dyn ObjectStorageClient) -> Result<&[Tag]> {
        let tags = self
            .tags
            .get_or_try_init(|| client.get_object_tags(&self.bucket, &self.key))
            .await?;
        Ok(tags.as_slice())
    }

    /// Returns the cached tag set, if it has been fetched.
    #[must_use]
    pub fn tags(&self) -> Option<&[Tag]> {
        self.tags.get().map(Vec::as_slice)
    }

    /// Returns `true` once the tag set has been fetched.
    #[must_use]
    pub fn tags_loaded(&self) -> bool {
        self.tags.initialized()
    }

    /// Returns the value of tag `key`, if the tag set is loaded and has it.
    #[must_use]
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags()?
            .iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value.as_str())
    }

    /// Formats an isolation tag value for `now`.
    #[must_use]
    pub fn build_isolation_value(now: DateTime<Utc>) -> String {
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Parses an isolation tag value.
    ///
    /// Accepts RFC 3339 and bare epoch milliseconds.
    #[must_use]
    pub fn parse_isolation_value(value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(date) = DateTime::parse_from_rfc3339(value) {
            return Some(date.with_timezone(&Utc));
        }
        value
            .parse::<i64>()
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
    }

    /// Returns the tag set with the isolation tag set to `value`, keeping the
    /// other tags.
    #[must_use]
    pub fn tags_with_isolation(&self, value: &str) -> Vec<Tag> {
        let mut tags = self.tags_without_isolation();
        tags.push(Tag::new(OBJECT_ISOLATED_TAG, value));
        tags
    }

    /// Returns the tag set minus the isolation tag.
    #[must_use]
    pub fn tags_without_isolation(&self) -> Vec<Tag> {
        self.tags()
            .unwrap_or_default()
            .iter()
            .filter(|tag| tag.key != OBJECT_ISOLATED_TAG)
            .cloned()
            .collect()
    }
}

impl Asset for ObjectAsset {
    fn identifier(&self) -> &str {
        &self.key
    }

    fn size(&self) -> u64 {
        self.size
    }

    /// Unloaded tag sets report no isolation tag; callers load tags first.
    fn has_isolation_tag(&self) -> bool {
        self.tag_value(OBJECT_ISOLATED_TAG).is_some()
    }

    fn isolation_date(&self) -> Option<DateTime<Utc>> {
        self.tag_value(OBJECT_ISOLATED_TAG)
            .and_then(Self::parse_isolation_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_image_isolation_tag_round_trip() {
        let tag = ImageAsset::build_isolation_tag(7, 1_700_000_000_000);
        assert_eq!(tag, "7-aws-cdk.isolated-1700000000000");

        let date = ImageAsset::parse_isolation_tag(&tag).expect("timestamp");
        assert_eq!(date.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_image_isolation_tag_lookup_is_substring() {
        let image = ImageAsset::new(
            "sha256:abc",
            10,
            vec![
                "abc123".to_string(),
                "0-aws-cdk.isolated-1700000000000".to_string(),
            ],
            "{}",
        );
        assert!(image.has_isolation_tag());
        assert_eq!(
            image.isolation_tag(),
            Some("0-aws-cdk.isolated-1700000000000")
        );
    }

    #[test]
    fn test_image_without_isolation_tag() {
        let image = ImageAsset::new("sha256:abc", 10, vec!["abc123".to_string()], "{}");
        assert!(!image.has_isolation_tag());
        assert!(image.isolation_date().is_none());
        assert!(!image.isolation_tag_before(Utc::now()));
    }

    #[test]
    fn test_image_malformed_isolation_tag_is_never_older() {
        let image = ImageAsset::new(
            "sha256:abc",
            10,
            vec!["aws-cdk.isolated".to_string()],
            "{}",
        );
        assert!(image.has_isolation_tag());
        assert!(!image.isolation_tag_before(Utc::now()));
    }

    #[test]
    fn test_image_isolation_tag_before() {
        let ten_days_ago = Utc::now() - Duration::days(10);
        let tag = ImageAsset::build_isolation_tag(0, ten_days_ago.timestamp_millis());
        let image = ImageAsset::new("sha256:abc", 10, vec![tag], "{}");

        assert!(image.isolation_tag_before(Utc::now() - Duration::days(3)));
        assert!(!image.isolation_tag_before(Utc::now() - Duration::days(30)));
    }

    #[test]
    fn test_object_file_name() {
        let object = ObjectAsset::new("bucket", "abc123.zip", 1);
        assert_eq!(object.file_name(), "abc123");

        let object = ObjectAsset::new("bucket", "noextension", 1);
        assert_eq!(object.file_name(), "noextension");
    }

    #[test]
    fn test_object_unloaded_tags() {
        let object = ObjectAsset::new("bucket", "abc.zip", 1);
        assert!(!object.tags_loaded());
        assert!(!object.has_isolation_tag());
        assert_eq!(object.tags_with_isolation("x").len(), 1);
    }

    #[test]
    fn test_object_isolation_value_formats() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).single().expect("date");
        let value = ObjectAsset::build_isolation_value(now);
        assert_eq!(value, "2023-11-14T22:13:20.123Z");
        assert_eq!(ObjectAsset::parse_isolation_value(&value), Some(now));

        // Epoch millis are accepted as well.
        assert_eq!(
            ObjectAsset::parse_isolation_value("1700000000123"),
            Some(now)
        );
        assert_eq!(ObjectAsset::parse_isolation_value(""), None);
        assert_eq!(ObjectAsset::parse_isolation_value("yesterday"), None);
    }

    #[test]
    fn test_object_tag_rewrites_keep_other_tags() {
        let object = ObjectAsset::with_tags(
            "bucket",
            "abc.zip",
            1,
            vec![
                Tag::new("team", "infra"),
                Tag::new(OBJECT_ISOLATED_TAG, "2020-01-01T00:00:00.000Z"),
            ],
        );
        assert!(object.has_isolation_tag());

        let without = object.tags_without_isolation();
        assert_eq!(without, vec![Tag::new("team", "infra")]);

        let with = object.tags_with_isolation("2024-01-01T00:00:00.000Z");
        assert_eq!(with.len(), 2);
        assert!(with.contains(&Tag::new(OBJECT_ISOLATED_TAG, "2024-01-01T00:00:00.000Z")));
    }
}
