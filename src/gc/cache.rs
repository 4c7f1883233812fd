//! Active asset cache.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// Reference blobs of every deployed stack.
///
/// Each blob is one stack's template body followed by its parameters. An
/// asset is referenced when its identifier occurs anywhere in any blob. The
/// test is a substring match on purpose: a false positive only keeps an asset
/// alive longer, while an exact index could miss a reference and delete
/// something in use.
///
/// The cache only grows during one collection run. Stacks deleted between
/// refreshes stay in it until the run ends.
#[derive(Debug, Default)]
pub struct ActiveAssetCache {
    stacks: RwLock<HashSet<String>>,
}

impl ActiveAssetCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reference blob.
    pub fn remember_stack(&self, reference: impl Into<String>) {
        self.stacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reference.into());
    }

    /// Returns `true` if `identifier` occurs in any reference blob.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.stacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|stack| stack.contains(identifier))
    }

    /// Number of distinct reference blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stacks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing has been remembered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
