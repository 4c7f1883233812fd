//! # assetgc
//!
//! Garbage collection for deployment assets.
//!
//! Infrastructure stacks publish their build artifacts into a bootstrapped
//! object-storage bucket (file assets) and a bootstrapped image repository
//! (container image assets). Over years of deployments most of those assets
//! stop being referenced by any deployed stack. `assetgc` finds them and
//! reclaims them without ever deleting something a live or in-flight
//! deployment still depends on.
//!
//! ## How it works
//!
//! - An [`gc::ActiveAssetCache`] holds the rendered templates of every deployed
//!   stack. An asset is "referenced" when its identifier appears anywhere in
//!   one of them.
//! - A [`gc::BackgroundStackRefresh`] keeps that cache fresh while a pass runs,
//!   and the pass refuses to act on data older than a staleness bound.
//! - Unreferenced assets are tagged as isolated first and deleted only after
//!   the isolation tag has aged past the rollback buffer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use assetgc::config::GcConfig;
//! use assetgc::gc::{GarbageCollector, GcClients};
//! use assetgc::models::Environment;
//!
//! let config = GcConfig::from_env().with_rollback_buffer_days(3);
//! let collector = GarbageCollector::new(config, clients)?;
//! let environment = Environment::new("prod", "123456789012", "us-east-1");
//! let report = collector.garbage_collect(&environment).await?;
//! println!("{}", report.summary());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod gc;
pub mod interaction;
pub mod models;
pub mod observability;
pub mod storage;

pub use config::GcConfig;
pub use gc::{ActiveAssetCache, BackgroundStackRefresh, GarbageCollector, GcClients, GcReport};
pub use models::{Action, AssetType, BootstrapInfo, Environment, ImageAsset, ObjectAsset};

/// Error type for garbage collection operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Invalid configuration, unparsable action/type strings |
/// | `OperationFailed` | A collaborator call (listing, deleting, template fetch) fails |
/// | `BootstrapNotFound` | The bootstrap stack does not exist in the environment |
/// | `RefreshTimeout` | The active-asset cache could not be brought within the staleness bound |
/// | `RefreshFailed` | Reading deployed stack templates failed |
/// | `Aborted` | The operator declined a deletion confirmation |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The bootstrap stack could not be found.
    ///
    /// Raised before any store pass begins; nothing has been mutated.
    #[error("bootstrap stack '{stack_name}' not found in environment {environment}")]
    BootstrapNotFound {
        /// Name of the bootstrap stack that was looked up.
        stack_name: String,
        /// Environment the lookup ran against.
        environment: String,
    },

    /// The background refresh did not land within the staleness bound.
    ///
    /// Usually means the background refresh task stalled or failed.
    #[error(
        "stack refresh took too long (no refresh within {max_age_ms}ms); \
         the background refresh likely failed"
    )]
    RefreshTimeout {
        /// The staleness bound that was exceeded, in milliseconds.
        max_age_ms: u64,
    },

    /// Refreshing the deployed stack templates failed.
    #[error("error refreshing stacks: {0}")]
    RefreshFailed(String),

    /// The operator aborted the run.
    #[error("aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from an operation name and a cause.
    pub fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for garbage collection operations.
pub type Result<T> = std::result::Result<T, Error>;
