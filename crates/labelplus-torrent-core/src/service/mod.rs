//! Capability trait implemented by the host torrent client.

use crate::error::{TorrentError, TorrentResult};
use crate::model::{HostDefaults, TorrentId, TorrentSettingsUpdate, TorrentStatus};

/// Synchronous view of the host client consumed by the label engine.
///
/// Every call runs to completion on the caller's thread; the engine never
/// holds host references across calls.
pub trait TorrentHost: Send + Sync {
    /// Whether the host session has finished starting up.
    fn session_started(&self) -> bool {
        true
    }

    /// Identifiers of every torrent currently known to the host.
    fn torrent_ids(&self) -> Vec<TorrentId>;

    /// Whether the host currently knows the torrent.
    fn contains(&self, id: &TorrentId) -> bool {
        self.status(id).is_some()
    }

    /// Status snapshot for a torrent, or `None` when unknown.
    fn status(&self, id: &TorrentId) -> Option<TorrentStatus>;

    /// Apply a settings patch to a torrent.
    ///
    /// # Errors
    ///
    /// Returns an error when the torrent is unknown or the host rejects a value.
    fn update_settings(&self, id: &TorrentId, update: &TorrentSettingsUpdate)
    -> TorrentResult<()>;

    /// Relocate torrent data; default implementation reports lack of support.
    ///
    /// # Errors
    ///
    /// Returns an error when the host cannot move the data.
    fn move_storage(&self, id: &TorrentId, path: &str) -> TorrentResult<()> {
        let _ = (id, path);
        Err(TorrentError::Unsupported {
            operation: "move_storage",
        })
    }

    /// Host-wide defaults for label-managed settings.
    fn defaults(&self) -> HostDefaults;
}
