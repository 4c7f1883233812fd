//! Logging and metrics setup.
//!
//! The library itself only emits `tracing` events and `metrics` samples.
//! Binaries embedding it call [`init_logging`] and, optionally,
//! [`install_metrics`] once at startup.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directives, e.g. `assetgc=debug`.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `RUST_LOG` | Filter directives | - |
    /// | `ASSETGC_LOG` | Filter directives when `RUST_LOG` is unset | `info` |
    /// | `ASSETGC_LOG_FORMAT` | `pretty` or `json` | `pretty` |
    /// | `ASSETGC_LOG_FILE` | Log file path | stderr |
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();
        if let Some(filter) = non_empty("RUST_LOG").or_else(|| non_empty("ASSETGC_LOG")) {
            config.filter = filter;
        }
        if let Some(format) = non_empty("ASSETGC_LOG_FORMAT").and_then(|v| LogFormat::parse(&v)) {
            config.format = format;
        }
        config.file = non_empty("ASSETGC_LOG_FILE").map(PathBuf::from);
        config
    }

    /// Sets the filter directives.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the log file.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Installs the global `tracing` subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid, the log file cannot be opened,
/// or a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| Error::InvalidInput(format!("invalid log filter '{}': {e}", config.filter)))?;

    match (&config.file, config.format) {
        (Some(path), LogFormat::Json) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(open_log_file(path)?)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
        (Some(path), LogFormat::Pretty) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(open_log_file(path)?)
                    .with_ansi(false)
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
        (None, LogFormat::Json) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
        (None, LogFormat::Pretty) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .try_init(),
    }
    .map_err(|e| Error::operation("logging_init", e))
}

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether a recorder is installed at all.
    pub enabled: bool,
    /// Serve the Prometheus scrape endpoint on this address.
    ///
    /// `None` installs the recorder without a listener; samples can still be
    /// rendered through the returned handle.
    pub listen_addr: Option<SocketAddr>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: None,
        }
    }
}

impl MetricsConfig {
    /// Builds metrics configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `ASSETGC_METRICS_ENABLED` | Install a recorder | `false` |
    /// | `ASSETGC_METRICS_PORT` | Serve the scrape endpoint on this port | none |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("ASSETGC_METRICS_ENABLED") {
            let value = value.to_lowercase();
            config.enabled = value == "true" || value == "1" || value == "yes";
        }
        if let Some(port) = std::env::var("ASSETGC_METRICS_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
        {
            config.listen_addr = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        }
        config
    }
}

/// Installs the global Prometheus recorder.
///
/// Returns `None` when metrics are disabled. Must be called from within a
/// tokio runtime when a listener is configured.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be started.
pub fn install_metrics(config: &MetricsConfig) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let handle = match config.listen_addr {
        Some(addr) => {
            let (recorder, exporter) = PrometheusBuilder::new()
                .with_http_listener(addr)
                .build()
                .map_err(|e| Error::operation("metrics_exporter_build", e))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| Error::operation("metrics_recorder_install", e))?;
            tokio::spawn(exporter);
            handle
        },
        None => PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| Error::operation("metrics_recorder_install", e))?,
    };

    tracing::debug!(listen_addr = ?config.listen_addr, "Installed Prometheus recorder");
    Ok(Some(handle))
}

/// Thread-safe file writer for logging.
#[derive(Clone)]
struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn open_log_file(path: &Path) -> Result<LogFileWriter> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::operation("create_log_dir", e))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::operation("open_log_file", format!("{}: {e}", path.display())))?;

    Ok(LogFileWriter {
        file: Arc::new(Mutex::new(file)),
    })
}
