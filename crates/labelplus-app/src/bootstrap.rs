//! Dependency wiring for the service.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use labelplus_config::{
    CONFIG_FILE_NAME, CONFIG_SAVE_INTERVAL_SECS, ConfigPersistence, JsonFileStore,
};
use labelplus_events::EventBus;
use labelplus_telemetry::{LoggingConfig, Metrics};
use labelplus_torrent_core::TorrentHost;

use crate::error::{AppError, AppResult};

/// Collaborators the service is built from.
pub struct ServiceDeps {
    /// Host the labels are applied to.
    pub host: Arc<dyn TorrentHost>,
    /// Bus carrying host events.
    pub events: EventBus,
    /// Where the label document is persisted.
    pub store: Arc<dyn ConfigPersistence>,
    /// Metrics registry shared with the engine.
    pub metrics: Metrics,
    /// Period of the persistence loop.
    pub save_interval: Duration,
}

impl ServiceDeps {
    /// Assemble dependencies with the default save interval.
    #[must_use]
    pub fn new(
        host: Arc<dyn TorrentHost>,
        events: EventBus,
        store: Arc<dyn ConfigPersistence>,
        metrics: Metrics,
    ) -> Self {
        Self {
            host,
            events,
            store,
            metrics,
            save_interval: Duration::from_secs(CONFIG_SAVE_INTERVAL_SECS),
        }
    }

    /// Production wiring: JSON document under `config_dir` and a fresh metrics registry.
    ///
    /// # Errors
    ///
    /// Returns an error when the metrics registry cannot be built.
    pub fn with_json_store(
        host: Arc<dyn TorrentHost>,
        events: EventBus,
        config_dir: &Path,
    ) -> AppResult<Self> {
        let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        let store = Arc::new(JsonFileStore::new(config_dir.join(CONFIG_FILE_NAME)));
        Ok(Self::new(host, events, store, metrics))
    }

    /// Override the persistence period.
    #[must_use]
    pub fn with_save_interval(mut self, save_interval: Duration) -> Self {
        self.save_interval = save_interval;
        self
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig<'_>) -> AppResult<()> {
    labelplus_telemetry::init_logging(config)
        .map_err(|err| AppError::telemetry("telemetry.init", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelplus_test_support::FakeHost;

    #[test]
    fn json_store_wiring_uses_default_interval() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let deps =
            ServiceDeps::with_json_store(Arc::new(FakeHost::new()), EventBus::new(), dir.path())?;
        assert_eq!(deps.save_interval, Duration::from_secs(CONFIG_SAVE_INTERVAL_SECS));
        let deps = deps.with_save_interval(Duration::from_millis(10));
        assert_eq!(deps.save_interval, Duration::from_millis(10));
        Ok(())
    }
}
