//! Per-batch classification of assets into action buckets.

use crate::models::Asset;
use chrono::{DateTime, Duration, Utc};

/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Action buckets for one batch.
///
/// Every asset of the batch lands in at most one bucket. Assets in none of
/// them need no action this pass.
#[derive(Debug, Clone)]
pub struct Classification<A> {
    /// Unreferenced assets whose isolation has outlasted the rollback buffer.
    pub deletable: Vec<A>,
    /// Unreferenced assets seen isolated for the first time.
    pub taggable: Vec<A>,
    /// Referenced assets still carrying an isolation tag from an earlier pass.
    pub untaggable: Vec<A>,
    /// Number of unreferenced assets in the batch.
    pub isolated: usize,
    /// Number of referenced assets in the batch.
    pub referenced: usize,
}

impl<A> Default for Classification<A> {
    fn default() -> Self {
        Self {
            deletable: Vec::new(),
            taggable: Vec::new(),
            untaggable: Vec::new(),
            isolated: 0,
            referenced: 0,
        }
    }
}

/// Returns `now` minus `days` whole days.
#[must_use]
pub fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::milliseconds(i64::from(days) * DAY_MS)
}

/// Splits a batch into action buckets.
///
/// With a zero rollback buffer every unreferenced asset is deletable and no
/// tagging happens. Otherwise unreferenced assets are tagged first and only
/// deleted once the tag is strictly older than `now - rollback_buffer_days`.
/// Object tags must be loaded before calling this.
pub fn classify<A, F>(
    batch: Vec<A>,
    is_referenced: F,
    rollback_buffer_days: u32,
    now: DateTime<Utc>,
) -> Classification<A>
where
    A: Asset,
    F: Fn(&A) -> bool,
{
    let mut result = Classification::default();
    let cutoff = days_before(now, rollback_buffer_days);

    for asset in batch {
        if is_referenced(&asset) {
            result.referenced += 1;
            if rollback_buffer_days > 0 && asset.has_isolation_tag() {
                result.untaggable.push(asset);
            }
            continue;
        }

        result.isolated += 1;
        if rollback_buffer_days == 0 {
            result.deletable.push(asset);
        } else if asset.isolation_tag_before(cutoff) {
            result.deletable.push(asset);
        } else if !asset.has_isolation_tag() {
            result.taggable.push(asset);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestAsset {
        id: String,
        referenced: bool,
        isolated_at: Option<Option<DateTime<Utc>>>,
    }

    impl Asset for TestAsset {
        fn identifier(&self) -> &str {
            &self.id
        }

        fn size(&self) -> u64 {
            1
        }

        fn has_isolation_tag(&self) -> bool {
            self.isolated_at.is_some()
        }

        fn isolation_date(&self) -> Option<DateTime<Utc>> {
            self.isolated_at.flatten()
        }
    }

    fn asset(id: &str, referenced: bool, tag_age_days: Option<i64>) -> TestAsset {
        TestAsset {
            id: id.to_string(),
            referenced,
            isolated_at: tag_age_days.map(|days| Some(Utc::now() - Duration::days(days))),
        }
    }

    #[test]
    fn test_zero_buffer_deletes_all_isolated() {
        let batch = vec![
            asset("a", false, None),
            asset("b", false, Some(1)),
            asset("c", true, Some(10)),
        ];
        let result = classify(batch, |a| a.referenced, 0, Utc::now());

        assert_eq!(result.deletable.len(), 2);
        assert!(result.taggable.is_empty());
        assert!(result.untaggable.is_empty());
    }

    #[test]
    fn test_buffer_tags_then_deletes() {
        let batch = vec![
            asset("stale", false, Some(10)),
            asset("new1", false, None),
            asset("new2", false, None),
            asset("young-tag", false, Some(1)),
        ];
        let result = classify(batch, |a| a.referenced, 3, Utc::now());

        let deletable: Vec<&str> = result.deletable.iter().map(|a| a.id.as_str()).collect();
        let taggable: Vec<&str> = result.taggable.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(deletable, vec!["stale"]);
        assert_eq!(taggable, vec!["new1", "new2"]);
        assert!(result.untaggable.is_empty());
        assert_eq!(result.isolated, 4);
    }

    #[test]
    fn test_referenced_with_tag_is_untagged() {
        let batch = vec![asset("live", true, Some(10)), asset("clean", true, None)];
        let result = classify(batch, |a| a.referenced, 3, Utc::now());

        assert_eq!(result.untaggable.len(), 1);
        assert_eq!(result.untaggable[0].id, "live");
        assert!(result.deletable.is_empty());
        assert_eq!(result.referenced, 2);
    }

    #[test]
    fn test_malformed_tag_is_neither_deleted_nor_retagged() {
        let batch = vec![TestAsset {
            id: "odd".to_string(),
            referenced: false,
            isolated_at: Some(None),
        }];
        let result = classify(batch, |a| a.referenced, 3, Utc::now());
        assert!(result.deletable.is_empty());
        assert!(result.taggable.is_empty());
    }

    #[test]
    fn test_days_before() {
        let now = Utc::now();
        assert_eq!(days_before(now, 0), now);
        assert_eq!((now - days_before(now, 2)).num_milliseconds(), 2 * DAY_MS);
    }

    proptest! {
        #[test]
        fn prop_buckets_are_exclusive(
            specs in prop::collection::vec(
                (any::<bool>(), prop::option::of(prop::option::of(0i64..30))),
                0..60,
            ),
            buffer in 0u32..10,
        ) {
            let now = Utc::now();
            let batch: Vec<TestAsset> = specs
                .iter()
                .enumerate()
                .map(|(i, (referenced, tag))| TestAsset {
                    id: i.to_string(),
                    referenced: *referenced,
                    isolated_at: tag.map(|age| age.map(|days| now - Duration::days(days))),
                })
                .collect();
            let total = batch.len();

            let result = classify(batch, |a| a.referenced, buffer, now);

            let mut seen = std::collections::HashSet::new();
            for a in result.deletable.iter().chain(&result.taggable).chain(&result.untaggable) {
                prop_assert!(seen.insert(a.id.clone()), "asset {} in two buckets", a.id);
            }
            prop_assert_eq!(result.isolated + result.referenced, total);

            // Grace period: nothing tagged within the buffer is ever deletable.
            if buffer > 0 {
                let cutoff = days_before(now, buffer);
                for a in &result.deletable {
                    prop_assert!(a.isolation_date().is_some_and(|d| d < cutoff));
                }
            }
            for a in &result.deletable {
                prop_assert!(!a.referenced);
            }
        }
    }
}
