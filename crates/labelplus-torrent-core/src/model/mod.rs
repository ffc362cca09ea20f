//! Torrent domain types shared between the host adapter and the label engine.

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Opaque torrent identifier assigned by the host (typically an info hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TorrentId(String);

impl TorrentId {
    /// Wrap a host identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TorrentId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for TorrentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TorrentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for TorrentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state reported by the host for a torrent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorrentState {
    /// Waiting in the host queue.
    #[default]
    Queued,
    /// Hash-checking on-disk data.
    Checking,
    /// Actively downloading payload.
    Downloading,
    /// Complete and uploading to peers.
    Seeding,
    /// Paused by the user or the queue.
    Paused,
    /// Halted because of an error.
    Error,
    /// Storage is being relocated.
    Moving,
    /// Pre-allocating storage.
    Allocating,
}

impl TorrentState {
    /// Whether the torrent is transferring payload (downloading or seeding).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Seeding)
    }
}

/// Point-in-time snapshot of the torrent fields the label engine reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TorrentStatus {
    /// Display name of the torrent.
    pub name: String,
    /// Current lifecycle state.
    pub state: TorrentState,
    /// Measured download payload rate in bytes per second.
    pub download_payload_rate: f64,
    /// Measured upload payload rate in bytes per second.
    pub upload_payload_rate: f64,
    /// Tracker announce URLs.
    #[serde(default)]
    pub trackers: Vec<String>,
    /// Relative paths of the files in the torrent payload.
    #[serde(default)]
    pub files: Vec<String>,
    /// Directory currently holding the torrent data.
    pub save_path: String,
    /// Move-on-complete destination currently configured on the torrent.
    pub move_completed_path: String,
    /// Whether every wanted piece has been downloaded.
    pub is_finished: bool,
    /// Label assigned by the host's single-level label feature, if any.
    #[serde(default)]
    pub legacy_label: Option<String>,
}

/// Patch of per-torrent settings pushed to the host; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TorrentSettingsUpdate {
    /// Toggle for moving data once the download completes.
    pub move_completed: Option<bool>,
    /// Destination used when moving completed data.
    pub move_completed_path: Option<String>,
    /// Prioritize the first and last pieces of each file.
    pub prioritize_first_last: Option<bool>,
    /// Download cap in KiB/s (negative means unlimited).
    pub max_download_speed: Option<f64>,
    /// Upload cap in KiB/s (negative means unlimited).
    pub max_upload_speed: Option<f64>,
    /// Peer connection cap (negative means unlimited).
    pub max_connections: Option<i32>,
    /// Upload slot cap (negative means unlimited).
    pub max_upload_slots: Option<i32>,
    /// Whether the host queue manages the torrent.
    pub auto_managed: Option<bool>,
    /// Stop seeding once the share ratio is reached.
    pub stop_at_ratio: Option<bool>,
    /// Share ratio used by `stop_at_ratio`.
    pub stop_ratio: Option<f64>,
    /// Remove the torrent once the share ratio is reached.
    pub remove_at_ratio: Option<bool>,
}

impl TorrentSettingsUpdate {
    /// Whether the patch carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Host-wide defaults restored on torrents that lose their label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostDefaults {
    /// Default save location for new torrents.
    pub download_location: String,
    /// Whether completed torrents are moved by default.
    pub move_completed: bool,
    /// Default move-on-complete destination (may be blank).
    pub move_completed_path: String,
    /// Default first/last piece prioritization.
    pub prioritize_first_last_pieces: bool,
    /// Default per-torrent download cap in KiB/s.
    pub max_download_speed_per_torrent: f64,
    /// Default per-torrent upload cap in KiB/s.
    pub max_upload_speed_per_torrent: f64,
    /// Default per-torrent connection cap.
    pub max_connections_per_torrent: i32,
    /// Default per-torrent upload slot cap.
    pub max_upload_slots_per_torrent: i32,
    /// Default auto-managed flag.
    pub auto_managed: bool,
    /// Default stop-at-ratio flag.
    pub stop_seed_at_ratio: bool,
    /// Default stop ratio.
    pub stop_seed_ratio: f64,
    /// Default remove-at-ratio flag.
    pub remove_seed_at_ratio: bool,
}

impl Default for HostDefaults {
    fn default() -> Self {
        Self {
            download_location: String::new(),
            move_completed: false,
            move_completed_path: String::new(),
            prioritize_first_last_pieces: false,
            max_download_speed_per_torrent: -1.0,
            max_upload_speed_per_torrent: -1.0,
            max_connections_per_torrent: -1,
            max_upload_slots_per_torrent: -1,
            auto_managed: true,
            stop_seed_at_ratio: false,
            stop_seed_ratio: 2.0,
            remove_seed_at_ratio: false,
        }
    }
}

impl HostDefaults {
    /// Default save path for torrent data.
    #[must_use]
    pub fn save_path(&self) -> &str {
        &self.download_location
    }

    /// Default move-on-complete path, falling back to the save path when blank.
    #[must_use]
    pub fn move_path(&self) -> &str {
        if self.move_completed_path.trim().is_empty() {
            self.save_path()
        } else {
            &self.move_completed_path
        }
    }

    /// Patch that restores every label-managed setting to the host default.
    #[must_use]
    pub fn reset_update(&self) -> TorrentSettingsUpdate {
        TorrentSettingsUpdate {
            move_completed: Some(self.move_completed),
            move_completed_path: Some(self.move_completed_path.clone()),
            prioritize_first_last: Some(self.prioritize_first_last_pieces),
            max_download_speed: Some(self.max_download_speed_per_torrent),
            max_upload_speed: Some(self.max_upload_speed_per_torrent),
            max_connections: Some(self.max_connections_per_torrent),
            max_upload_slots: Some(self.max_upload_slots_per_torrent),
            auto_managed: Some(self.auto_managed),
            stop_at_ratio: Some(self.stop_seed_at_ratio),
            stop_ratio: Some(self.stop_seed_ratio),
            remove_at_ratio: Some(self.remove_seed_at_ratio),
        }
    }
}
