#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! Logging and metrics shared across the LabelPlus workspace.
//!
//! Layout: `init.rs` (tracing subscriber setup), `metrics.rs` (Prometheus
//! registry), `error.rs` (`TelemetryError`).

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use init::{
    DEFAULT_LOG_LEVEL, LOG_FORMAT_ENV, LogFormat, LoggingConfig, init_logging, plugin_version,
};
pub use metrics::{Metrics, MetricsSnapshot};
