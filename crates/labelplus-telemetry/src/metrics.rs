//! Prometheus-backed metrics registry for the label engine.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Cheap to clone; every clone shares the same registry.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Metrics shared by the service, its loops and the operation registry.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    labels: IntGauge,
    labeled_torrents: IntGauge,
    shared_limit_cycles_total: IntCounter,
    autolabel_matches_total: IntCounter,
    storage_moves_total: IntCounter,
    config_saves_total: IntCounter,
}

/// Point-in-time copy of every collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Number of labels in the tree.
    pub labels: i64,
    /// Number of torrents with a label.
    pub labeled_torrents: i64,
    /// Redistribution cycles executed.
    pub shared_limit_cycles_total: u64,
    /// Torrents labeled by autolabel rules.
    pub autolabel_matches_total: u64,
    /// Storage moves requested from the host.
    pub storage_moves_total: u64,
    /// Successful configuration saves.
    pub config_saves_total: u64,
}

fn gauge(registry: &Registry, name: &'static str, help: &str) -> TelemetryResult<IntGauge> {
    let collector = IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}

fn counter(registry: &Registry, name: &'static str, help: &str) -> TelemetryResult<IntCounter> {
    let collector = IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}

impl Metrics {
    /// Construct a registry with every collector registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be built or registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();
        let labels = gauge(&registry, "labelplus_labels", "Labels in the tree")?;
        let labeled_torrents = gauge(
            &registry,
            "labelplus_labeled_torrents",
            "Torrents mapped to a label",
        )?;
        let shared_limit_cycles_total = counter(
            &registry,
            "labelplus_shared_limit_cycles_total",
            "Shared bandwidth redistribution cycles executed",
        )?;
        let autolabel_matches_total = counter(
            &registry,
            "labelplus_autolabel_matches_total",
            "Torrents labeled by autolabel rules",
        )?;
        let storage_moves_total = counter(
            &registry,
            "labelplus_storage_moves_total",
            "Storage moves requested from the host",
        )?;
        let config_saves_total = counter(
            &registry,
            "labelplus_config_saves_total",
            "Configuration documents saved",
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                labels,
                labeled_torrents,
                shared_limit_cycles_total,
                autolabel_matches_total,
                storage_moves_total,
                config_saves_total,
            }),
        })
    }

    /// Set the label count and labeled torrent gauges.
    pub fn set_tree_size(&self, labels: usize, labeled_torrents: usize) {
        self.inner
            .labels
            .set(i64::try_from(labels).unwrap_or(i64::MAX));
        self.inner
            .labeled_torrents
            .set(i64::try_from(labeled_torrents).unwrap_or(i64::MAX));
    }

    /// Count one redistribution cycle.
    pub fn inc_shared_limit_cycle(&self) {
        self.inner.shared_limit_cycles_total.inc();
    }

    /// Count one torrent labeled by autolabel rules.
    pub fn inc_autolabel_match(&self) {
        self.inner.autolabel_matches_total.inc();
    }

    /// Count one storage move.
    pub fn inc_storage_move(&self) {
        self.inner.storage_moves_total.inc();
    }

    /// Count one configuration save.
    pub fn inc_config_save(&self) {
        self.inner.config_saves_total.inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Copy the current value of every collector.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            labels: self.inner.labels.get(),
            labeled_torrents: self.inner.labeled_torrents.get(),
            shared_limit_cycles_total: self.inner.shared_limit_cycles_total.get(),
            autolabel_matches_total: self.inner.autolabel_matches_total.get(),
            storage_moves_total: self.inner.storage_moves_total.get(),
            config_saves_total: self.inner.config_saves_total.get(),
        }
    }
}
