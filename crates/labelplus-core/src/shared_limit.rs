//! Shared bandwidth redistribution across a label's active torrents.
//!
//! A label with a shared limit treats its download and upload caps as a
//! budget for all of its torrents together. Each cycle measures what every
//! active torrent used, deducts any overrun in proportion to usage and
//! splits spare headroom evenly between torrents that are moving data.

use labelplus_torrent_core::{TorrentId, TorrentSettingsUpdate, TorrentStatus};
use tracing::{debug, trace};

use crate::state::CoreState;

/// Floor for any redistributed per-torrent cap, in KiB/s.
pub const MIN_SHARED_RATE: f64 = 0.1;

/// Measured payload rates of one active torrent, in KiB/s.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSample {
    /// Torrent the sample belongs to.
    pub torrent_id: TorrentId,
    /// Download payload rate.
    pub download_rate: f64,
    /// Upload payload rate.
    pub upload_rate: f64,
}

impl RateSample {
    /// Sample from a host status, converting bytes/s to KiB/s.
    #[must_use]
    pub fn from_status(torrent_id: TorrentId, status: &TorrentStatus) -> Self {
        Self {
            torrent_id,
            download_rate: status.download_payload_rate / 1024.0,
            upload_rate: status.upload_payload_rate / 1024.0,
        }
    }
}

/// Per-torrent caps computed for one cycle, in KiB/s (`-1` is unlimited).
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentLimits {
    /// Torrent the limits apply to.
    pub torrent_id: TorrentId,
    /// Download cap.
    pub max_download_speed: f64,
    /// Upload cap.
    pub max_upload_speed: f64,
}

#[allow(clippy::cast_precision_loss)]
fn share(cap: f64, rates: &[f64]) -> Vec<f64> {
    if cap < 0.0 {
        return vec![-1.0; rates.len()];
    }
    let sum: f64 = rates.iter().sum();
    let diff = sum - cap;
    let active = rates.iter().filter(|rate| **rate > 0.0).count();
    rates
        .iter()
        .map(|&own| {
            let limit = if diff >= 0.0 {
                // Over budget: throttle in proportion to usage.
                if sum > 0.0 { own - own / sum * diff } else { own }
            } else if own > 0.0 {
                own + diff.abs() / active as f64
            } else {
                cap
            };
            limit.max(MIN_SHARED_RATE)
        })
        .collect()
}

/// Split a label's caps over its active torrents.
///
/// Returns nothing when both caps are unlimited.
#[must_use]
pub fn redistribute(
    download_cap: f64,
    upload_cap: f64,
    samples: &[RateSample],
) -> Vec<TorrentLimits> {
    if download_cap < 0.0 && upload_cap < 0.0 {
        return Vec::new();
    }
    let downloads: Vec<f64> = samples.iter().map(|sample| sample.download_rate).collect();
    let uploads: Vec<f64> = samples.iter().map(|sample| sample.upload_rate).collect();
    samples
        .iter()
        .zip(share(download_cap, &downloads))
        .zip(share(upload_cap, &uploads))
        .map(|((sample, max_download_speed), max_upload_speed)| TorrentLimits {
            torrent_id: sample.torrent_id.clone(),
            max_download_speed,
            max_upload_speed,
        })
        .collect()
}

impl CoreState {
    /// Run one redistribution cycle over every shared-limit label.
    ///
    /// Returns the number of torrents whose caps were pushed.
    pub fn update_shared_limits(&self) -> usize {
        let mut pushed = 0;
        for label_id in &self.shared_limit_index {
            let Some(record) = self.labels.get(label_id) else {
                continue;
            };
            let options = &record.options;
            let samples: Vec<RateSample> = self
                .index
                .torrents(label_id)
                .iter()
                .filter_map(|torrent_id| {
                    self.host
                        .status(torrent_id)
                        .filter(|status| status.state.is_active())
                        .map(|status| RateSample::from_status(torrent_id.clone(), &status))
                })
                .collect();
            let limits =
                redistribute(options.max_download_speed, options.max_upload_speed, &samples);
            trace!(label_id = %label_id, torrents = limits.len(), "shared limits computed");
            for limit in limits {
                let update = TorrentSettingsUpdate {
                    max_download_speed: Some(limit.max_download_speed),
                    max_upload_speed: Some(limit.max_upload_speed),
                    ..TorrentSettingsUpdate::default()
                };
                if let Err(error) = self.host.update_settings(&limit.torrent_id, &update) {
                    debug!(
                        torrent_id = %limit.torrent_id,
                        error = %error,
                        "shared limit not applied"
                    );
                    continue;
                }
                pushed += 1;
            }
        }
        self.metrics.inc_shared_limit_cycle();
        pushed
    }
}
