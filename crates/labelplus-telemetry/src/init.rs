//! Subscriber installation for the plugin's `tracing` output.
//!
//! # Design
//! - `RUST_LOG` takes precedence; otherwise `level` is applied as the filter.
//! - Output format comes from `LABELPLUS_LOG_FORMAT` when set, else the build profile.
//! - The plugin version is stamped once and reused by every startup log line.

use std::str::FromStr;

use once_cell::sync::OnceCell;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Filter used when neither `RUST_LOG` nor a level override is present.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable selecting `json` or `pretty` output.
pub const LOG_FORMAT_ENV: &str = "LABELPLUS_LOG_FORMAT";

static PLUGIN_VERSION: OnceCell<String> = OnceCell::new();

/// Options for [`init_logging`].
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Filter directive applied when `RUST_LOG` is unset.
    pub level: &'a str,
    /// Line format.
    pub format: LogFormat,
    /// Version string attached to the startup record.
    pub plugin_version: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::from_env().unwrap_or_else(LogFormat::infer),
            plugin_version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Line format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human output.
    Pretty,
}

impl LogFormat {
    /// Pretty for debug builds, JSON for release builds.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Format named by [`LOG_FORMAT_ENV`], if it is set and recognised.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(LOG_FORMAT_ENV).ok()?.parse().ok()
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(TelemetryError::UnknownLogFormat {
                value: value.to_string(),
            }),
        }
    }
}

/// Install the process-wide subscriber.
///
/// # Errors
///
/// Fails when `level` is not a valid filter directive or a subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig<'_>) -> TelemetryResult<()> {
    let filter = env_filter(config.level)?;
    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer().json().with_current_span(false).boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
    };
    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|source| TelemetryError::SubscriberInstall { source })?;

    let version = PLUGIN_VERSION.get_or_init(|| config.plugin_version.to_string());
    tracing::info!(version = %version, format = ?config.format, "labelplus logging ready");
    Ok(())
}

/// Version stamped by the first successful [`init_logging`] call.
#[must_use]
pub fn plugin_version() -> Option<&'static str> {
    PLUGIN_VERSION.get().map(String::as_str)
}

fn env_filter(level: &str) -> TelemetryResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|source| TelemetryError::InvalidFilter {
        directive: level.to_string(),
        source,
    })
}
