//! Configuration management.
//!
//! A [`GcConfig`] comes from one of three places, later ones overriding
//! earlier ones when combined:
//!
//! 1. Built-in defaults (a full, confirmed collection of both stores).
//! 2. A TOML file, see [`GcConfig::load_from_file`].
//! 3. `ASSETGC_*` environment variables, see [`GcConfig::with_env_overrides`].
//!
//! ```toml
//! [gc]
//! type = "all"
//! action = "full"
//! rollback_buffer_days = 3
//! created_buffer_days = 1
//! confirm = true
//! bootstrap_stack_name = "CDKToolkit"
//!
//! [concurrency]
//! max_concurrent = 50
//! ```

use crate::models::{Action, AssetType, DEFAULT_BOOTSTRAP_STACK_NAME};
use crate::storage::bulkhead::BulkheadConfig;
use crate::storage::traits::OBJECT_DELETE_BATCH_LIMIT;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of assets read per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Options of a garbage collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    /// Which stores to collect.
    pub asset_type: AssetType,
    /// What the run may do.
    pub action: Action,
    /// Days an asset must stay isolated before it may be deleted.
    ///
    /// Zero deletes unreferenced assets on sight, without tagging.
    pub rollback_buffer_days: u32,
    /// Days since creation before an asset is considered at all.
    pub created_buffer_days: u32,
    /// Ask before deleting.
    pub confirm: bool,
    /// Name of the bootstrap stack to collect.
    pub bootstrap_stack_name: String,
    /// Oldest active-asset data a batch may act on.
    pub max_staleness: Duration,
    /// Delay between background refreshes.
    pub refresh_interval: Duration,
    /// Objects per batch. Also the delete request size, so at most 1000.
    pub object_batch_size: usize,
    /// Image digests per batch. Deletes are chunked to 100 regardless.
    pub image_batch_size: usize,
    /// Bound on concurrent per-asset calls.
    pub concurrency: BulkheadConfig,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            asset_type: AssetType::All,
            action: Action::Full,
            rollback_buffer_days: 0,
            created_buffer_days: 1,
            confirm: true,
            bootstrap_stack_name: DEFAULT_BOOTSTRAP_STACK_NAME.to_string(),
            max_staleness: crate::gc::DEFAULT_MAX_STALENESS,
            refresh_interval: crate::gc::DEFAULT_REFRESH_INTERVAL,
            object_batch_size: DEFAULT_BATCH_SIZE,
            image_batch_size: DEFAULT_BATCH_SIZE,
            concurrency: BulkheadConfig::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Collection options.
    pub gc: Option<ConfigFileGc>,
    /// Concurrency options.
    pub concurrency: Option<ConfigFileConcurrency>,
}

/// `[gc]` section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileGc {
    /// Asset type (`s3`, `ecr`, `all`).
    #[serde(rename = "type")]
    pub asset_type: Option<String>,
    /// Action (`print`, `tag`, `delete-tagged`, `full`).
    pub action: Option<String>,
    /// Rollback buffer in days.
    pub rollback_buffer_days: Option<u32>,
    /// Created buffer in days.
    pub created_buffer_days: Option<u32>,
    /// Ask before deleting.
    pub confirm: Option<bool>,
    /// Bootstrap stack name.
    pub bootstrap_stack_name: Option<String>,
    /// Staleness bound in seconds.
    pub max_staleness_secs: Option<u64>,
    /// Refresh interval in seconds.
    pub refresh_interval_secs: Option<u64>,
    /// Objects per batch.
    pub object_batch_size: Option<usize>,
    /// Images per batch.
    pub image_batch_size: Option<usize>,
}

/// `[concurrency]` section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileConcurrency {
    /// Maximum concurrent per-asset calls.
    pub max_concurrent: Option<usize>,
    /// Permit acquire timeout in milliseconds.
    pub acquire_timeout_ms: Option<u64>,
}

impl GcConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the asset type.
    #[must_use]
    pub const fn with_asset_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = asset_type;
        self
    }

    /// Sets the action.
    #[must_use]
    pub const fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Sets the rollback buffer.
    #[must_use]
    pub const fn with_rollback_buffer_days(mut self, days: u32) -> Self {
        self.rollback_buffer_days = days;
        self
    }

    /// Sets the created buffer.
    #[must_use]
    pub const fn with_created_buffer_days(mut self, days: u32) -> Self {
        self.created_buffer_days = days;
        self
    }

    /// Sets whether deletions are confirmed.
    #[must_use]
    pub const fn with_confirm(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    /// Sets the bootstrap stack name.
    #[must_use]
    pub fn with_bootstrap_stack_name(mut self, name: impl Into<String>) -> Self {
        self.bootstrap_stack_name = name.into();
        self
    }

    /// Sets the staleness bound.
    #[must_use]
    pub const fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = max_staleness;
        self
    }

    /// Sets the background refresh interval.
    #[must_use]
    pub const fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the object batch size.
    #[must_use]
    pub const fn with_object_batch_size(mut self, size: usize) -> Self {
        self.object_batch_size = size;
        self
    }

    /// Sets the image batch size.
    #[must_use]
    pub const fn with_image_batch_size(mut self, size: usize) -> Self {
        self.image_batch_size = size;
        self
    }

    /// Sets the concurrency bound.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: BulkheadConfig) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Loads configuration from environment variables on top of the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `ASSETGC_TYPE` | `asset_type` |
    /// | `ASSETGC_ACTION` | `action` |
    /// | `ASSETGC_ROLLBACK_BUFFER_DAYS` | `rollback_buffer_days` |
    /// | `ASSETGC_CREATED_BUFFER_DAYS` | `created_buffer_days` |
    /// | `ASSETGC_CONFIRM` | `confirm` |
    /// | `ASSETGC_BOOTSTRAP_STACK_NAME` | `bootstrap_stack_name` |
    /// | `ASSETGC_MAX_STALENESS_SECS` | `max_staleness` |
    /// | `ASSETGC_REFRESH_INTERVAL_SECS` | `refresh_interval` |
    /// | `ASSETGC_OBJECT_BATCH_SIZE` | `object_batch_size` |
    /// | `ASSETGC_IMAGE_BATCH_SIZE` | `image_batch_size` |
    ///
    /// Bulkhead variables are applied through [`BulkheadConfig::with_env_overrides`].
    /// Unparsable values are ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let mut config = self.apply_overrides(|key| std::env::var(key).ok());
        config.concurrency = config.concurrency.with_env_overrides();
        config
    }

    fn apply_overrides(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = get("ASSETGC_TYPE").and_then(|v| v.parse().ok()) {
            self.asset_type = v;
        }
        if let Some(v) = get("ASSETGC_ACTION").and_then(|v| v.parse().ok()) {
            self.action = v;
        }
        if let Some(v) = get("ASSETGC_ROLLBACK_BUFFER_DAYS").and_then(|v| v.trim().parse().ok()) {
            self.rollback_buffer_days = v;
        }
        if let Some(v) = get("ASSETGC_CREATED_BUFFER_DAYS").and_then(|v| v.trim().parse().ok()) {
            self.created_buffer_days = v;
        }
        if let Some(v) = get("ASSETGC_CONFIRM") {
            self.confirm = !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no");
        }
        if let Some(v) = get("ASSETGC_BOOTSTRAP_STACK_NAME") {
            self.bootstrap_stack_name = v;
        }
        if let Some(v) = get("ASSETGC_MAX_STALENESS_SECS").and_then(|v| v.trim().parse().ok()) {
            self.max_staleness = Duration::from_secs(v);
        }
        if let Some(v) = get("ASSETGC_REFRESH_INTERVAL_SECS").and_then(|v| v.trim().parse().ok()) {
            self.refresh_interval = Duration::from_secs(v);
        }
        if let Some(v) = get("ASSETGC_OBJECT_BATCH_SIZE").and_then(|v| v.trim().parse().ok()) {
            self.object_batch_size = v;
        }
        if let Some(v) = get("ASSETGC_IMAGE_BATCH_SIZE").and_then(|v| v.trim().parse().ok()) {
            self.image_batch_size = v;
        }
        self
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or names an
    /// unknown asset type or action.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("read_config_file", e))?;

        let file: ConfigFile =
            toml::from_str(&contents).map_err(|e| Error::operation("parse_config_file", e))?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/assetgc/` on macOS)
    /// 2. XDG config dir (`~/.config/assetgc/`)
    ///
    /// Returns default configuration if no readable config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join("assetgc").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("assetgc")
                .join("config.toml"),
        ];
        Self::load_first(&candidates)
    }

    /// Loads the first existing, readable file of `candidates`.
    fn load_first(candidates: &[PathBuf]) -> Self {
        for path in candidates.iter().filter(|path| path.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable config file"
                ),
            }
        }

        Self::default()
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(gc) = file.gc {
            if let Some(asset_type) = gc.asset_type {
                config.asset_type = asset_type.parse()?;
            }
            if let Some(action) = gc.action {
                config.action = action.parse()?;
            }
            if let Some(days) = gc.rollback_buffer_days {
                config.rollback_buffer_days = days;
            }
            if let Some(days) = gc.created_buffer_days {
                config.created_buffer_days = days;
            }
            if let Some(confirm) = gc.confirm {
                config.confirm = confirm;
            }
            if let Some(name) = gc.bootstrap_stack_name {
                config.bootstrap_stack_name = name;
            }
            if let Some(secs) = gc.max_staleness_secs {
                config.max_staleness = Duration::from_secs(secs);
            }
            if let Some(secs) = gc.refresh_interval_secs {
                config.refresh_interval = Duration::from_secs(secs);
            }
            if let Some(size) = gc.object_batch_size {
                config.object_batch_size = size;
            }
            if let Some(size) = gc.image_batch_size {
                config.image_batch_size = size;
            }
        }

        if let Some(concurrency) = file.concurrency {
            if let Some(max) = concurrency.max_concurrent {
                config.concurrency.max_concurrent = max;
            }
            if let Some(timeout) = concurrency.acquire_timeout_ms {
                config.concurrency.acquire_timeout_ms = timeout;
            }
        }

        Ok(config)
    }

    /// Checks the configuration for values a run cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.object_batch_size == 0 || self.image_batch_size == 0 {
            return Err(Error::InvalidInput("batch sizes must be at least 1".to_string()));
        }
        if self.object_batch_size > OBJECT_DELETE_BATCH_LIMIT {
            return Err(Error::InvalidInput(format!(
                "object batch size {} exceeds the delete limit of {OBJECT_DELETE_BATCH_LIMIT}",
                self.object_batch_size
            )));
        }
        if self.max_staleness.is_zero() {
            return Err(Error::InvalidInput("max staleness must be positive".to_string()));
        }
        if self.refresh_interval.is_zero() {
            return Err(Error::InvalidInput("refresh interval must be positive".to_string()));
        }
        if self.bootstrap_stack_name.trim().is_empty() {
            return Err(Error::InvalidInput("bootstrap stack name must not be empty".to_string()));
        }
        if self.concurrency.max_concurrent == 0 {
            return Err(Error::InvalidInput("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}
