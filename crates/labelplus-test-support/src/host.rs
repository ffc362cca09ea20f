//! In-memory [`TorrentHost`] that records every call.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use labelplus_torrent_core::{
    HostDefaults, TorrentError, TorrentHost, TorrentId, TorrentResult, TorrentSettingsUpdate,
    TorrentState, TorrentStatus,
};

use crate::fixtures::host_defaults;

#[derive(Debug)]
struct Rejected;

impl fmt::Display for Rejected {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("rejected by fake host")
    }
}

impl Error for Rejected {}

#[derive(Debug, Default)]
struct FakeTorrent {
    status: TorrentStatus,
    settings: TorrentSettingsUpdate,
}

#[derive(Debug)]
struct Inner {
    torrents: BTreeMap<TorrentId, FakeTorrent>,
    defaults: HostDefaults,
    session_started: bool,
    fail_updates: bool,
    updates: Vec<(TorrentId, TorrentSettingsUpdate)>,
    moves: Vec<(TorrentId, String)>,
}

/// Host double backed by a map of torrents.
#[derive(Debug)]
pub struct FakeHost {
    inner: Mutex<Inner>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

fn overlay(current: &mut TorrentSettingsUpdate, update: &TorrentSettingsUpdate) {
    macro_rules! take {
        ($($field:ident),*) => {
            $(if let Some(value) = update.$field.clone() {
                current.$field = Some(value);
            })*
        };
    }
    take!(
        move_completed,
        move_completed_path,
        prioritize_first_last,
        max_download_speed,
        max_upload_speed,
        max_connections,
        max_upload_slots,
        auto_managed,
        stop_at_ratio,
        stop_ratio,
        remove_at_ratio
    );
}

impl FakeHost {
    /// Started session with [`host_defaults`] and no torrents.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                torrents: BTreeMap::new(),
                defaults: host_defaults(),
                session_started: true,
                fail_updates: false,
                updates: Vec::new(),
                moves: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a torrent.
    pub fn add_torrent(&self, id: &str, status: TorrentStatus) {
        self.lock().torrents.insert(
            TorrentId::from(id),
            FakeTorrent {
                status,
                settings: TorrentSettingsUpdate::default(),
            },
        );
    }

    /// Drop a torrent.
    pub fn remove_torrent(&self, id: &str) {
        self.lock().torrents.remove(id);
    }

    /// Replace the measured rates (bytes/s) and state of a torrent.
    pub fn set_rates(&self, id: &str, state: TorrentState, download: f64, upload: f64) {
        if let Some(torrent) = self.lock().torrents.get_mut(id) {
            torrent.status.state = state;
            torrent.status.download_payload_rate = download;
            torrent.status.upload_payload_rate = upload;
        }
    }

    /// Mark a torrent finished or unfinished.
    pub fn set_finished(&self, id: &str, finished: bool) {
        if let Some(torrent) = self.lock().torrents.get_mut(id) {
            torrent.status.is_finished = finished;
        }
    }

    /// Toggle whether the session reports itself started.
    pub fn set_session_started(&self, started: bool) {
        self.lock().session_started = started;
    }

    /// Replace the host defaults.
    pub fn set_defaults(&self, defaults: HostDefaults) {
        self.lock().defaults = defaults;
    }

    /// Make every settings update fail.
    pub fn fail_updates(&self, fail: bool) {
        self.lock().fail_updates = fail;
    }

    /// Accumulated settings pushed to a torrent.
    #[must_use]
    pub fn settings(&self, id: &str) -> TorrentSettingsUpdate {
        self.lock()
            .torrents
            .get(id)
            .map(|torrent| torrent.settings.clone())
            .unwrap_or_default()
    }

    /// Every settings update in call order.
    #[must_use]
    pub fn updates(&self) -> Vec<(TorrentId, TorrentSettingsUpdate)> {
        self.lock().updates.clone()
    }

    /// Every storage move in call order.
    #[must_use]
    pub fn moves(&self) -> Vec<(TorrentId, String)> {
        self.lock().moves.clone()
    }

    /// Forget recorded updates and moves.
    pub fn clear_history(&self) {
        let mut inner = self.lock();
        inner.updates.clear();
        inner.moves.clear();
    }
}

impl TorrentHost for FakeHost {
    fn session_started(&self) -> bool {
        self.lock().session_started
    }

    fn torrent_ids(&self) -> Vec<TorrentId> {
        self.lock().torrents.keys().cloned().collect()
    }

    fn contains(&self, id: &TorrentId) -> bool {
        self.lock().torrents.contains_key(id)
    }

    fn status(&self, id: &TorrentId) -> Option<TorrentStatus> {
        self.lock()
            .torrents
            .get(id)
            .map(|torrent| torrent.status.clone())
    }

    fn update_settings(&self, id: &TorrentId, update: &TorrentSettingsUpdate) -> TorrentResult<()> {
        let mut inner = self.lock();
        if inner.fail_updates {
            return Err(TorrentError::OperationFailed {
                operation: "update_settings",
                torrent_id: Some(id.clone()),
                source: Box::new(Rejected),
            });
        }
        let torrent = inner
            .torrents
            .get_mut(id)
            .ok_or_else(|| TorrentError::NotFound {
                torrent_id: id.clone(),
            })?;
        overlay(&mut torrent.settings, update);
        if let Some(path) = &update.move_completed_path {
            torrent.status.move_completed_path.clone_from(path);
        }
        inner.updates.push((id.clone(), update.clone()));
        Ok(())
    }

    fn move_storage(&self, id: &TorrentId, path: &str) -> TorrentResult<()> {
        let mut inner = self.lock();
        let torrent = inner
            .torrents
            .get_mut(id)
            .ok_or_else(|| TorrentError::NotFound {
                torrent_id: id.clone(),
            })?;
        torrent.status.save_path = path.to_string();
        inner.moves.push((id.clone(), path.to_string()));
        Ok(())
    }

    fn defaults(&self) -> HostDefaults {
        self.lock().defaults.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::torrent;

    #[test]
    fn updates_accumulate_and_are_recorded() {
        let host = FakeHost::new();
        host.add_torrent("a", torrent("a"));
        let id = TorrentId::from("a");
        host.update_settings(
            &id,
            &TorrentSettingsUpdate {
                max_connections: Some(10),
                ..TorrentSettingsUpdate::default()
            },
        )
        .expect("update");
        host.update_settings(
            &id,
            &TorrentSettingsUpdate {
                auto_managed: Some(false),
                ..TorrentSettingsUpdate::default()
            },
        )
        .expect("update");
        let settings = host.settings("a");
        assert_eq!(settings.max_connections, Some(10));
        assert_eq!(settings.auto_managed, Some(false));
        assert_eq!(host.updates().len(), 2);
    }

    #[test]
    fn moves_relocate_and_unknown_torrents_fail() {
        let host = FakeHost::new();
        host.add_torrent("a", torrent("a"));
        host.move_storage(&TorrentId::from("a"), "/elsewhere")
            .expect("move");
        assert_eq!(
            host.status(&TorrentId::from("a")).map(|s| s.save_path),
            Some("/elsewhere".to_string())
        );
        assert!(host.move_storage(&TorrentId::from("zz"), "/x").is_err());
    }

    #[test]
    fn failing_mode_rejects_updates() {
        let host = FakeHost::new();
        host.add_torrent("a", torrent("a"));
        host.fail_updates(true);
        let result = host.update_settings(&TorrentId::from("a"), &TorrentSettingsUpdate::default());
        assert!(matches!(result, Err(TorrentError::OperationFailed { .. })));
    }
}
