//! Collaborator traits.
//!
//! The collector never talks to a provider SDK directly; it goes through these
//! object-safe async traits so that the same pass logic runs against real
//! clients and the in-memory backends.

mod image;
mod object;
mod stack;

pub use image::{ImageDetail, ImageId, ImageIdPage, ImageManifest, ImageRegistryClient};
pub use object::{DeleteFailure, DeleteOutcome, ObjectPage, ObjectStorageClient, ObjectSummary};
pub use stack::{BootstrapLookup, StackClient};

/// Maximum keys per object batch delete.
pub const OBJECT_DELETE_BATCH_LIMIT: usize = 1000;

/// Maximum ids per image describe / get / delete call.
pub const IMAGE_BATCH_LIMIT: usize = 100;
