//! Builders for host snapshots used throughout the test suites.

use labelplus_torrent_core::{HostDefaults, TorrentState, TorrentStatus};

/// Host defaults with distinct save and move paths.
#[must_use]
pub fn host_defaults() -> HostDefaults {
    HostDefaults {
        download_location: "/downloads".into(),
        move_completed_path: "/completed".into(),
        ..HostDefaults::default()
    }
}

/// Idle, unfinished torrent stored in the host's default location.
#[must_use]
pub fn torrent(name: &str) -> TorrentStatus {
    TorrentStatus {
        name: name.to_string(),
        state: TorrentState::Paused,
        save_path: "/downloads".into(),
        move_completed_path: "/completed".into(),
        ..TorrentStatus::default()
    }
}

/// Seeding torrent uploading at `upload_kib` KiB/s.
#[must_use]
pub fn seeding(name: &str, upload_kib: f64) -> TorrentStatus {
    TorrentStatus {
        state: TorrentState::Seeding,
        upload_payload_rate: upload_kib * 1024.0,
        is_finished: true,
        ..torrent(name)
    }
}

/// Downloading torrent receiving at `download_kib` KiB/s.
#[must_use]
pub fn downloading(name: &str, download_kib: f64) -> TorrentStatus {
    TorrentStatus {
        state: TorrentState::Downloading,
        download_payload_rate: download_kib * 1024.0,
        ..torrent(name)
    }
}
