//! Telemetry failures.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Failures while setting up logging or working with the metrics registry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already set.
    #[error("tracing subscriber already installed")]
    SubscriberInstall {
        /// Error returned by `try_init`.
        source: tracing_subscriber::util::TryInitError,
    },
    /// The level string is not a filter directive.
    #[error("invalid log filter directive")]
    InvalidFilter {
        /// Directive as given.
        directive: String,
        /// Parser error.
        source: tracing_subscriber::filter::ParseError,
    },
    /// Unrecognised log format name.
    #[error("unknown log format")]
    UnknownLogFormat {
        /// Name as given.
        value: String,
    },
    /// A collector could not be created or registered.
    #[error("metric registration failed")]
    MetricsRegister {
        /// Metric name.
        name: &'static str,
        /// Prometheus error.
        source: PrometheusError,
    },
    /// Encoding the registry failed.
    #[error("metric exposition failed")]
    MetricsEncode {
        /// Prometheus error.
        source: PrometheusError,
    },
    /// Exposition text was not UTF-8.
    #[error("metric exposition was not utf-8")]
    MetricsUtf8 {
        /// Conversion error.
        source: std::string::FromUtf8Error,
    },
}

/// Result alias for telemetry helpers.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
