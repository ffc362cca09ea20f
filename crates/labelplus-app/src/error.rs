//! # Design
//!
//! - Centralize service-level errors for lifecycle, persistence and dispatch.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use labelplus_core::CoreError;
use thiserror::Error;

/// Result alias for service operations.
pub type AppResult<T> = Result<T, AppError>;

/// Service-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Label engine operations failed.
    #[error("label operation failed")]
    Core {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        source: CoreError,
    },
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: labelplus_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: labelplus_telemetry::TelemetryError,
    },
    /// No operation is registered under the name.
    #[error("unknown operation")]
    UnknownOperation {
        /// Requested operation name.
        name: String,
    },
    /// Operation arguments did not decode.
    #[error("invalid operation arguments")]
    InvalidArguments {
        /// Operation identifier.
        operation: &'static str,
        /// Source decode error.
        source: serde_json::Error,
    },
    /// Operation result did not encode.
    #[error("failed to encode operation result")]
    Encode {
        /// Operation identifier.
        operation: &'static str,
        /// Source encode error.
        source: serde_json::Error,
    },
    /// Operation did not finish within its deadline.
    #[error("operation timed out")]
    TimedOut {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Operation kept failing with retryable errors.
    #[error("maximum retries exceeded")]
    MaxRetriesExceeded {
        /// Operation identifier.
        operation: &'static str,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl AppError {
    pub(crate) const fn core(operation: &'static str, source: CoreError) -> Self {
        Self::Core { operation, source }
    }

    pub(crate) const fn config(
        operation: &'static str,
        source: labelplus_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: labelplus_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    /// Whether the failure clears up once the service finishes initializing.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Core {
                source: CoreError::CoreNotInitialized,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_uninitialized_engine_errors_are_retryable() {
        assert!(AppError::core("get_label_updates", CoreError::CoreNotInitialized).is_retryable());
        assert!(!AppError::core("add_label", CoreError::EmptyLabel).is_retryable());
        let config = AppError::config(
            "config.load",
            labelplus_config::ConfigError::UnsupportedVersion {
                found: 1,
                expected: 2,
            },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert!(!config.is_retryable());
        assert!(
            !AppError::TimedOut {
                operation: "get_label_updates"
            }
            .is_retryable()
        );
    }
}
