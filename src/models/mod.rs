//! Data models for garbage collection.
//!
//! This module contains the value types that flow through a collection run:
//! assets, deployed stacks, the bootstrap environment and run options.

mod asset;
mod environment;
mod options;
mod stack;

pub use asset::{Asset, IMAGE_ISOLATED_TAG, ImageAsset, OBJECT_ISOLATED_TAG, ObjectAsset, Tag};
pub use environment::{BootstrapInfo, DEFAULT_BOOTSTRAP_STACK_NAME, Environment};
pub use options::{Action, AssetType, StoreKind};
pub use stack::{
    BOOTSTRAP_VERSION_PARAMETER, StackPage, StackStatus, StackSummary, TemplateParameter,
    TemplateSummary,
};
