//! Storage layer abstraction.
//!
//! This module provides the provider seams a collection run works against:
//! - **Traits**: object storage, image registry, stack control plane and
//!   bootstrap lookup
//! - **Memory**: in-process implementations of every trait
//! - **Bulkhead**: bounded concurrency for per-asset calls

// Allow cast precision loss for gauge values where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]

pub mod bulkhead;
pub mod memory;
pub mod traits;

pub use bulkhead::{BulkheadConfig, TaskBulkhead};
pub use memory::{
    ImageRegistryStats, InMemoryImageRegistry, InMemoryObjectStore, InMemoryStackClient,
    ObjectStoreStats, StaticBootstrapLookup,
};
pub use traits::{BootstrapLookup, ImageRegistryClient, ObjectStorageClient, StackClient};
